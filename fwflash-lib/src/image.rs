//! Sparse source images and the contiguous address ranges they populate.

use crate::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Byte value of unprogrammed NOR flash; gaps in a sparse image read back
/// as this.
pub const FILL_BYTE: u8 = 0xFF;

/// A sparse firmware image: bytes keyed by absolute address.
pub trait SourceImage {
    /// Populated addresses in ascending order.
    fn addresses(&self) -> Box<dyn Iterator<Item = u32> + '_>;

    /// Exactly `len` bytes starting at `address`; unpopulated addresses
    /// yield [`FILL_BYTE`].
    fn read_bytes(&self, address: u32, len: usize) -> Vec<u8>;
}

/// A maximal contiguous run of populated addresses, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub start: u32,
    pub end: u32,
}

impl AddressRange {
    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Collapses an image's populated addresses into ordered, non-overlapping
/// contiguous ranges: the minimal erase/write plan for the image.
pub fn address_ranges(image: &dyn SourceImage) -> Vec<AddressRange> {
    let mut ranges = Vec::new();
    let mut current: Option<AddressRange> = None;
    for addr in image.addresses() {
        current = Some(match current {
            // Still contiguous, extend the running range.
            Some(range) if addr == range.end => AddressRange {
                start: range.start,
                end: addr + 1,
            },
            // Gap: flush and start over at this address.
            Some(range) => {
                ranges.push(range);
                AddressRange {
                    start: addr,
                    end: addr + 1,
                }
            }
            None => AddressRange {
                start: addr,
                end: addr + 1,
            },
        });
    }
    if let Some(range) = current {
        ranges.push(range);
    }
    ranges
}

/// [`SourceImage`] backed by an Intel HEX firmware file.
pub struct IhexImage {
    bytes: BTreeMap<u32, u8>,
}

impl IhexImage {
    pub fn from_hex(hex: &str) -> Result<Self> {
        let mut bytes = BTreeMap::new();
        let mut base: u32 = 0;
        for record in ihex::Reader::new(hex) {
            match record? {
                ihex::Record::Data { offset, value } => {
                    for (i, byte) in value.iter().enumerate() {
                        bytes.insert(base + u32::from(offset) + i as u32, *byte);
                    }
                }
                ihex::Record::ExtendedSegmentAddress(segment) => {
                    base = u32::from(segment) << 4;
                }
                ihex::Record::ExtendedLinearAddress(upper) => {
                    base = u32::from(upper) << 16;
                }
                ihex::Record::EndOfFile => break,
                // Start-address records name an entry point, not image data.
                ihex::Record::StartSegmentAddress { .. } | ihex::Record::StartLinearAddress(_) => {}
            }
        }
        Ok(Self { bytes })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_hex(&fs::read_to_string(path)?)
    }

    /// Number of populated addresses.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl SourceImage for IhexImage {
    fn addresses(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        Box::new(self.bytes.keys().copied())
    }

    fn read_bytes(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| {
                address
                    .checked_add(i as u32)
                    .and_then(|addr| self.bytes.get(&addr))
                    .copied()
                    .unwrap_or(FILL_BYTE)
            })
            .collect()
    }
}
