//! Device-family dispatch: message opcodes, sector geometry and the
//! erase-restriction policy.

use crate::{Error, Result};
use strum::{Display, EnumString};

/// Flash device family addressed by a programming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum DeviceFamily {
    /// On-chip flash behind the STM flash controller.
    #[strum(serialize = "stm")]
    #[cfg_attr(feature = "cli", clap(name = "stm"))]
    Stm,
    /// External M25 serial NOR flash.
    #[strum(serialize = "m25")]
    #[cfg_attr(feature = "cli", clap(name = "m25"))]
    M25,
}

/// Message opcodes for one family.
///
/// `done` acknowledges both erase and write completions. On both families
/// it aliases the write opcode, so completion callbacks are registered per
/// response kind rather than one-to-one with request opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcodes {
    pub write: u8,
    pub read: u8,
    pub erase: u8,
    pub done: u8,
}

const STM_OPCODES: Opcodes = Opcodes {
    write: 0xE0,
    read: 0xE1,
    erase: 0xE2,
    done: 0xE0,
};

const M25_OPCODES: Opcodes = Opcodes {
    write: 0xF0,
    read: 0xF1,
    erase: 0xF2,
    done: 0xF0,
};

const STM_FLASH_BASE: u32 = 0x0800_0000;

// STM physical sector layout over [0x0800_0000, 0x0810_0000):
// 4 x 16 KiB, 1 x 64 KiB, 7 x 128 KiB. Entry i is the exclusive end
// address of sector i.
const STM_SECTOR_ENDS: [u32; 12] = [
    0x0800_4000,
    0x0800_8000,
    0x0800_C000,
    0x0801_0000,
    0x0802_0000,
    0x0804_0000,
    0x0806_0000,
    0x0808_0000,
    0x080A_0000,
    0x080C_0000,
    0x080E_0000,
    0x0810_0000,
];

const M25_FLASH_SIZE: u32 = 0x10_0000;
const M25_SECTOR_SHIFT: u32 = 16;

impl DeviceFamily {
    /// Parses a family name, mapping unknown names to `UnsupportedDevice`.
    pub fn parse(name: &str) -> Result<Self> {
        name.parse()
            .map_err(|_| Error::UnsupportedDevice(name.to_string()))
    }

    pub fn opcodes(self) -> Opcodes {
        match self {
            DeviceFamily::Stm => STM_OPCODES,
            DeviceFamily::M25 => M25_OPCODES,
        }
    }

    /// Maps an address to the index of the sector containing it.
    pub fn address_to_sector(self, address: u32) -> Result<u32> {
        match self {
            DeviceFamily::Stm => stm_sector(address),
            DeviceFamily::M25 => m25_sector(address),
        }
    }

    /// Whether a sector is off limits to erase and write.
    ///
    /// STM sectors 0-3 hold the bootloader servicing this very link, and
    /// the top M25 sector holds the authentication hash.
    pub fn is_restricted(self, sector: u32) -> bool {
        match self {
            DeviceFamily::Stm => sector < 4,
            DeviceFamily::M25 => sector == 15,
        }
    }
}

fn stm_sector(address: u32) -> Result<u32> {
    if address < STM_FLASH_BASE {
        return Err(Error::AddressOutOfRange { address });
    }
    STM_SECTOR_ENDS
        .iter()
        .position(|&end| address < end)
        .map(|sector| sector as u32)
        .ok_or(Error::AddressOutOfRange { address })
}

fn m25_sector(address: u32) -> Result<u32> {
    if address >= M25_FLASH_SIZE {
        return Err(Error::AddressOutOfRange { address });
    }
    Ok(address >> M25_SECTOR_SHIFT)
}
