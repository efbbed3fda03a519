//! Decoding of the ESP32 binary partition table.
//!
//! The table is a sequence of 32-byte little-endian records:
//!
//! | bytes  | field                      |
//! |--------|----------------------------|
//! | 0..2   | guard bytes `0xAA 0x50`    |
//! | 2      | type (`0x00` = app)        |
//! | 3      | subtype                    |
//! | 4..8   | offset                     |
//! | 8..12  | size                       |
//! | 12..32 | name, NUL padded           |
//!
//! The first record whose guard bytes do not match ends the table. Unused
//! flash reads back as `0xFF`, and the MD5 record written by newer ESP-IDF
//! versions starts with `0xEB 0xEB`; both terminate the sequence.
use crate::error::{Error, Result};

/// Length of one encoded record.
pub const RECORD_LEN: usize = 32;

const GUARD: [u8; 2] = [0xAA, 0x50];
const NAME_LEN: usize = 20;

/// The partition type of an executable firmware image.
pub const TYPE_APP: u8 = 0x00;

/// One entry of the partition table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionRecord {
    pub ty: u8,
    pub subtype: u8,
    pub offset: u32,
    pub size: u32,
    pub name: String,
}

impl PartitionRecord {
    /// Whether this partition holds executable firmware.
    pub fn is_app(&self) -> bool {
        self.ty == TYPE_APP
    }

    fn decode(raw: &[u8; RECORD_LEN]) -> Option<Self> {
        if raw[0..2] != GUARD {
            return None;
        }

        let name_bytes = &raw[12..12 + NAME_LEN];
        let end = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_LEN);

        Some(Self {
            ty: raw[2],
            subtype: raw[3],
            offset: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            size: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            name: String::from_utf8_lossy(&name_bytes[..end]).into_owned(),
        })
    }
}

/// Iterator over the valid records of a partition table buffer.
///
/// Yields records in table order and stops at the first record with a
/// mismatched guard byte. A buffer that runs out in the middle of a record
/// yields a single [`Error::TruncatedRecord`] and then ends. The iterator is
/// fused once it has ended.
pub struct Partitions<'a> {
    buf: &'a [u8],
    index: usize,
    done: bool,
}

/// Parses `buf` as a partition table.
pub fn parse(buf: &[u8]) -> Partitions<'_> {
    Partitions {
        buf,
        index: 0,
        done: false,
    }
}

impl Iterator for Partitions<'_> {
    type Item = Result<PartitionRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let start = self.index * RECORD_LEN;
        let remaining = &self.buf[start.min(self.buf.len())..];
        if remaining.is_empty() {
            self.done = true;
            return None;
        }

        let Some(raw) = remaining.first_chunk::<RECORD_LEN>() else {
            self.done = true;
            return Some(Err(Error::TruncatedRecord {
                index: self.index,
                available: remaining.len(),
            }));
        };

        match PartitionRecord::decode(raw) {
            Some(record) => {
                self.index += 1;
                Some(Ok(record))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl std::iter::FusedIterator for Partitions<'_> {}
