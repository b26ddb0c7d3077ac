//! On-disk format for skipfile
//!
//! A database is a single file: a fixed 64-byte header followed by an
//! append-only sequence of records. The first record (offset 64) is the
//! head sentinel of the skip index.
//!
//! ## File Layout
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Header (64 bytes)                            │
//! │ ┌─────┬───────┬─────┬──────┬────────────────┐│
//! │ │Magic│Version│Flags│ UUID │ Gen/Counts/CRC ││
//! │ └─────┴───────┴─────┴──────┴────────────────┘│
//! ├──────────────────────────────────────────────┤
//! │ Head sentinel (MAX_LEVEL pointer slots)      │
//! ├──────────────────────────────────────────────┤
//! │ Record                                       │
//! │ ┌────┬─────┬────┬────┬────┬────────┬───┬───┐│
//! │ │Kind│Level│KLen│VLen│Prev│Pointers│CRC│K/V││
//! │ └────┴─────┴────┴────┴────┴────────┴───┴───┘│
//! │ ... (appended, never rewritten in place,    │
//! │      except the pointer slots)              │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! `current_size` in the header is the commit marker: bytes at or beyond
//! it belong to an uncommitted transaction and are rewound on the next
//! writer open. Pointer slots are the only mutable bytes in a record, so
//! the record checksum deliberately excludes them.

mod record;

pub use record::{Record, RecordKind};

use crate::error::{Result, SkipError};

// =============================================================================
// Layout Constants
// =============================================================================

/// File magic: identifies a skipfile database
pub const MAGIC: &[u8; 4] = b"SKF1";

/// Current format version
pub const VERSION: u16 = 1;

/// Size of the fixed file header
pub const HEADER_SIZE: u64 = 64;

/// Offset of the head sentinel record
pub const HEAD_OFFSET: u64 = HEADER_SIZE;

/// Maximum skip-index level (head sentinel always carries this many slots)
pub const MAX_LEVEL: usize = 20;

/// Header flag bit: the file was created without checksums
pub const FLAG_NOCHECKSUM: u16 = 0x0001;

// =============================================================================
// Header
// =============================================================================

/// The fixed file header, cached in memory per handle
///
/// Mutated only by the exclusive-lock holder, as the final act of commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Format flags persisted at creation
    pub flags: u16,
    /// Stable unique identifier, assigned once at creation
    pub uuid: [u8; 16],
    /// Monotonically increasing counter bumped on repack
    pub generation: u64,
    /// Number of live (non-tombstoned) records
    pub num_records: u64,
    /// Committed tail offset; the commit marker
    pub current_size: u64,
    /// Reclaimable bytes (superseded versions and tombstones)
    pub dirty_size: u64,
}

impl Header {
    /// Build a fresh header for a newly created database
    pub fn fresh(nochecksum: bool) -> Self {
        let mut uuid = [0u8; 16];
        let a = fastrand::u64(..).to_le_bytes();
        let b = fastrand::u64(..).to_le_bytes();
        uuid[..8].copy_from_slice(&a);
        uuid[8..].copy_from_slice(&b);

        Self {
            flags: if nochecksum { FLAG_NOCHECKSUM } else { 0 },
            uuid,
            generation: 1,
            num_records: 0,
            current_size: 0, // filled in once the head sentinel is written
            dirty_size: 0,
        }
    }

    /// Serialize to the 64-byte on-disk layout
    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..6].copy_from_slice(&VERSION.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..24].copy_from_slice(&self.uuid);
        buf[24..32].copy_from_slice(&self.generation.to_le_bytes());
        buf[32..40].copy_from_slice(&self.num_records.to_le_bytes());
        buf[40..48].copy_from_slice(&self.current_size.to_le_bytes());
        buf[48..56].copy_from_slice(&self.dirty_size.to_le_bytes());
        // bytes 56..60 reserved, zero
        let crc = crc32fast::hash(&buf[0..60]);
        buf[60..64].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parse and validate the 64-byte on-disk layout
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE as usize {
            return Err(SkipError::internal("short header"));
        }
        if &buf[0..4] != MAGIC {
            return Err(SkipError::internal(format!(
                "bad magic: expected SKF1, got {:?}",
                &buf[0..4]
            )));
        }
        let version = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        if version != VERSION {
            return Err(SkipError::internal(format!(
                "unsupported format version: {}",
                version
            )));
        }
        let stored = u32::from_le_bytes(buf[60..64].try_into().unwrap());
        let computed = crc32fast::hash(&buf[0..60]);
        if stored != computed {
            return Err(SkipError::internal(format!(
                "header checksum mismatch: stored {:08x}, computed {:08x}",
                stored, computed
            )));
        }

        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&buf[8..24]);

        Ok(Self {
            flags: u16::from_le_bytes(buf[6..8].try_into().unwrap()),
            uuid,
            generation: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            num_records: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
            current_size: u64::from_le_bytes(buf[40..48].try_into().unwrap()),
            dirty_size: u64::from_le_bytes(buf[48..56].try_into().unwrap()),
        })
    }

    /// Whether the file was created with checksums disabled
    pub fn nochecksum(&self) -> bool {
        self.flags & FLAG_NOCHECKSUM != 0
    }

    /// The stable identifier formatted as 32 lowercase hex digits
    pub fn uuid_string(&self) -> String {
        let mut s = String::with_capacity(32);
        for b in &self.uuid {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }
}

/// Round an offset up to 8-byte alignment
pub const fn align8(n: u64) -> u64 {
    (n + 7) & !7
}

/// Draw a random record level: geometric with P = 1/2, capped at MAX_LEVEL
pub fn random_level() -> u8 {
    let mut level = 1u8;
    while (level as usize) < MAX_LEVEL && fastrand::bool() {
        level += 1;
    }
    level
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip_and_crc() {
        let mut h = Header::fresh(false);
        h.num_records = 7;
        h.current_size = 4096;
        h.dirty_size = 123;
        let buf = h.encode();
        let back = Header::decode(&buf).unwrap();
        assert_eq!(h, back);

        // corrupt one byte anywhere in the covered region
        let mut bad = buf;
        bad[30] ^= 0xff;
        assert!(Header::decode(&bad).is_err());
    }

    #[test]
    fn random_level_in_range() {
        for _ in 0..1000 {
            let l = random_level();
            assert!((1..=MAX_LEVEL as u8).contains(&l));
        }
    }
}
