//! File header and meta slots.
//!
//! ```text
//! [0..32)    header: magic "CELLARDB" | major u16 | minor u16 | zeros | crc32
//! [32..80)   meta slot A (even versions)
//! [80..128)  meta slot B (odd versions)
//! [128..)    page frames
//! ```
//!
//! A meta slot names the root frame of one committed version and the end
//! of the data that version depends on. Two slots alternate so that a torn
//! slot write never destroys the previous version.

use crate::error::{CoreError, CoreResult};
use crate::types::SnapshotVersion;

/// Magic bytes at the start of every data file.
pub const FILE_MAGIC: &[u8; 8] = b"CELLARDB";

/// Size of the file header.
pub const HEADER_SIZE: usize = 32;

/// Size of one meta slot.
pub const META_SLOT_SIZE: usize = 48;

/// Offset of meta slot A.
pub const META_A_OFFSET: u64 = HEADER_SIZE as u64;

/// Offset of meta slot B.
pub const META_B_OFFSET: u64 = META_A_OFFSET + META_SLOT_SIZE as u64;

/// Offset of the first page frame.
pub const DATA_START: u64 = META_B_OFFSET + META_SLOT_SIZE as u64;

const META_MAGIC: &[u8; 4] = b"CMET";
// The checksum is the last field so a slot torn anywhere fails to verify.
const META_CRC_OFFSET: usize = META_SLOT_SIZE - 4;

/// The file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version (major, minor).
    pub format_version: (u16, u16),
}

impl FileHeader {
    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(FILE_MAGIC);
        buf[8..10].copy_from_slice(&self.format_version.0.to_le_bytes());
        buf[10..12].copy_from_slice(&self.format_version.1.to_le_bytes());
        let crc = crc32fast::hash(&buf[..HEADER_SIZE - 4]);
        buf[HEADER_SIZE - 4..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes and verifies a header.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for a wrong magic, short input or bad checksum.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(CoreError::invalid_format("file header is truncated"));
        }
        if &bytes[0..8] != FILE_MAGIC {
            return Err(CoreError::invalid_format("not a CellarDB file"));
        }
        let stored = u32::from_le_bytes([bytes[28], bytes[29], bytes[30], bytes[31]]);
        let computed = crc32fast::hash(&bytes[..HEADER_SIZE - 4]);
        if stored != computed {
            return Err(CoreError::invalid_format("file header checksum mismatch"));
        }
        let major = u16::from_le_bytes([bytes[8], bytes[9]]);
        let minor = u16::from_le_bytes([bytes[10], bytes[11]]);
        Ok(Self {
            format_version: (major, minor),
        })
    }
}

/// One committed version pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaSlot {
    /// Committed version.
    pub version: SnapshotVersion,
    /// Offset of the version's root frame.
    pub root_offset: u64,
    /// Length of the root frame.
    pub root_len: u32,
    /// End of the data this version depends on.
    pub data_end: u64,
}

impl MetaSlot {
    /// Offset of the slot that holds `version`.
    #[must_use]
    pub fn offset_for(version: SnapshotVersion) -> u64 {
        if version.as_u64() % 2 == 0 {
            META_A_OFFSET
        } else {
            META_B_OFFSET
        }
    }

    /// Encodes the slot.
    #[must_use]
    pub fn encode(&self) -> [u8; META_SLOT_SIZE] {
        let mut buf = [0u8; META_SLOT_SIZE];
        buf[0..4].copy_from_slice(META_MAGIC);
        buf[4..12].copy_from_slice(&self.version.as_u64().to_le_bytes());
        buf[12..20].copy_from_slice(&self.root_offset.to_le_bytes());
        buf[20..24].copy_from_slice(&self.root_len.to_le_bytes());
        buf[24..32].copy_from_slice(&self.data_end.to_le_bytes());
        let crc = crc32fast::hash(&buf[..META_CRC_OFFSET]);
        buf[META_CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a slot, returning `None` if it is empty, torn or damaged.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < META_SLOT_SIZE || &bytes[0..4] != META_MAGIC {
            return None;
        }
        let stored = read_u32(&bytes[META_CRC_OFFSET..]);
        if stored != crc32fast::hash(&bytes[..META_CRC_OFFSET]) {
            return None;
        }
        Some(Self {
            version: SnapshotVersion::new(read_u64(&bytes[4..])),
            root_offset: read_u64(&bytes[12..]),
            root_len: read_u32(&bytes[20..]),
            data_end: read_u64(&bytes[24..]),
        })
    }

    /// Returns true if the slot's root frame lies within `file_size`.
    #[must_use]
    pub fn fits(&self, file_size: u64) -> bool {
        self.root_offset >= DATA_START
            && self
                .root_offset
                .checked_add(u64::from(self.root_len))
                .is_some_and(|end| end <= self.data_end)
            && self.data_end <= file_size
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_constants() {
        assert_eq!(META_A_OFFSET, 32);
        assert_eq!(META_B_OFFSET, 80);
        assert_eq!(DATA_START, 128);
    }

    #[test]
    fn header_roundtrip() {
        let header = FileHeader {
            format_version: (1, 2),
        };
        let bytes = header.encode();
        assert_eq!(&bytes[0..8], b"CELLARDB");
        assert_eq!(FileHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn header_rejects_garbage() {
        assert!(FileHeader::decode(b"short").is_err());
        let mut bytes = FileHeader {
            format_version: (1, 0),
        }
        .encode();
        bytes[9] ^= 1;
        assert!(FileHeader::decode(&bytes).is_err());
        assert!(FileHeader::decode(&[0u8; HEADER_SIZE]).is_err());
    }

    #[test]
    fn slot_selection_alternates() {
        assert_eq!(MetaSlot::offset_for(SnapshotVersion::new(2)), META_A_OFFSET);
        assert_eq!(MetaSlot::offset_for(SnapshotVersion::new(3)), META_B_OFFSET);
    }

    #[test]
    fn slot_roundtrip_and_damage() {
        let slot = MetaSlot {
            version: SnapshotVersion::new(7),
            root_offset: 4096,
            root_len: 90,
            data_end: 4186,
        };
        let bytes = slot.encode();
        assert_eq!(MetaSlot::decode(&bytes), Some(slot));
        assert!(slot.fits(4186));
        assert!(!slot.fits(4185));

        let mut torn = bytes;
        torn[10] ^= 0x40;
        assert_eq!(MetaSlot::decode(&torn), None);
        assert_eq!(MetaSlot::decode(&[0u8; META_SLOT_SIZE]), None);
    }

    #[test]
    fn slot_torn_at_any_byte_never_reads_as_new() {
        let old_slot = MetaSlot {
            version: SnapshotVersion::new(2),
            root_offset: 200,
            root_len: 40,
            data_end: 240,
        };
        let new_slot = MetaSlot {
            version: SnapshotVersion::new(4),
            root_offset: 300,
            root_len: 40,
            data_end: 340,
        };
        let old = old_slot.encode();
        let new = new_slot.encode();

        for written in 0..META_SLOT_SIZE {
            let mut torn = old;
            torn[..written].copy_from_slice(&new[..written]);
            let decoded = MetaSlot::decode(&torn);
            assert!(
                decoded.is_none() || decoded == Some(old_slot),
                "torn after {written} bytes decoded as {decoded:?}"
            );

            let mut fresh = [0u8; META_SLOT_SIZE];
            fresh[..written].copy_from_slice(&new[..written]);
            assert_eq!(MetaSlot::decode(&fresh), None, "fresh slot torn after {written} bytes");
        }
    }
}
