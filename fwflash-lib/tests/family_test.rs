use fwflash_lib::{DeviceFamily, Error};

const STM_BASE: u32 = 0x0800_0000;
const STM_END: u32 = 0x0810_0000;

#[test]
fn stm_sector_boundaries() {
    // (first address, sector index) of every STM sector.
    let starts = [
        (0x0800_0000, 0),
        (0x0800_4000, 1),
        (0x0800_8000, 2),
        (0x0800_C000, 3),
        (0x0801_0000, 4),
        (0x0802_0000, 5),
        (0x0804_0000, 6),
        (0x0806_0000, 7),
        (0x0808_0000, 8),
        (0x080A_0000, 9),
        (0x080C_0000, 10),
        (0x080E_0000, 11),
    ];
    for (addr, sector) in starts {
        assert_eq!(DeviceFamily::Stm.address_to_sector(addr).unwrap(), sector);
        // Last address of the previous sector.
        if sector > 0 {
            assert_eq!(
                DeviceFamily::Stm.address_to_sector(addr - 1).unwrap(),
                sector - 1
            );
        }
    }
    assert_eq!(DeviceFamily::Stm.address_to_sector(STM_END - 1).unwrap(), 11);
}

#[test]
fn stm_sector_map_is_monotonic_partition() {
    let mut previous = 0;
    let mut counts = [0u32; 12];
    for addr in (STM_BASE..STM_END).step_by(0x100) {
        let sector = DeviceFamily::Stm.address_to_sector(addr).unwrap();
        assert!(sector >= previous, "sector map went backwards at {addr:#X}");
        previous = sector;
        counts[sector as usize] += 1;
    }
    // 16 KiB sectors 0-3, 64 KiB sector 4, 128 KiB sectors 5-11, counted
    // in 0x100 steps.
    assert_eq!(&counts[..4], &[0x40; 4]);
    assert_eq!(counts[4], 0x100);
    assert_eq!(&counts[5..], &[0x200; 7]);
}

#[test]
fn stm_rejects_addresses_outside_the_window() {
    for addr in [0, STM_BASE - 1, STM_END, u32::MAX] {
        match DeviceFamily::Stm.address_to_sector(addr) {
            Err(Error::AddressOutOfRange { address }) => assert_eq!(address, addr),
            other => panic!("expected AddressOutOfRange for {addr:#X}, got {other:?}"),
        }
    }
}

#[test]
fn m25_sector_is_address_high_word() {
    assert_eq!(DeviceFamily::M25.address_to_sector(0).unwrap(), 0);
    assert_eq!(DeviceFamily::M25.address_to_sector(0xFFFF).unwrap(), 0);
    assert_eq!(DeviceFamily::M25.address_to_sector(0x1_0000).unwrap(), 1);
    assert_eq!(DeviceFamily::M25.address_to_sector(0xF_FFFF).unwrap(), 15);
}

#[test]
fn m25_rejects_addresses_outside_the_window() {
    for addr in [0x10_0000, u32::MAX] {
        match DeviceFamily::M25.address_to_sector(addr) {
            Err(Error::AddressOutOfRange { address }) => assert_eq!(address, addr),
            other => panic!("expected AddressOutOfRange for {addr:#X}, got {other:?}"),
        }
    }
}

#[test]
fn restricted_sectors() {
    for sector in 0..4 {
        assert!(DeviceFamily::Stm.is_restricted(sector));
    }
    for sector in 4..12 {
        assert!(!DeviceFamily::Stm.is_restricted(sector));
    }
    for sector in 0..15 {
        assert!(!DeviceFamily::M25.is_restricted(sector));
    }
    assert!(DeviceFamily::M25.is_restricted(15));
}

#[test]
fn done_opcode_aliases_write() {
    for family in [DeviceFamily::Stm, DeviceFamily::M25] {
        let ops = family.opcodes();
        assert_eq!(ops.done, ops.write);
        assert_ne!(ops.done, ops.erase);
        assert_ne!(ops.read, ops.write);
    }
}

#[test]
fn family_parsing() {
    assert_eq!(DeviceFamily::parse("stm").unwrap(), DeviceFamily::Stm);
    assert_eq!(DeviceFamily::parse("STM").unwrap(), DeviceFamily::Stm);
    assert_eq!(DeviceFamily::parse("m25").unwrap(), DeviceFamily::M25);
    match DeviceFamily::parse("avr") {
        Err(Error::UnsupportedDevice(name)) => assert_eq!(name, "avr"),
        other => panic!("expected UnsupportedDevice, got {other:?}"),
    }
}
