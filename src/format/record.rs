//! Record codec
//!
//! Serializes and deserializes a single key/value record together with its
//! skip-index pointer slots and checksum.
//!
//! ## Record Layout
//! ```text
//!  0..1    kind        (1 = Head, 2 = Add, 3 = Tombstone)
//!  1..2    level       (1..=MAX_LEVEL forward pointers)
//!  2..4    reserved    (zero)
//!  4..8    key_len     u32 LE
//!  8..12   val_len     u32 LE
//! 12..20   prev_version u64 LE (offset of the superseded version, 0 = none)
//! 20..20+8L  pointer slots, u64 LE each (0 = end of chain)
//! +0..+4   crc32 over the immutable bytes (fixed head minus slots,
//!          plus key and value)
//! then     key bytes, value bytes, zero padding to 8-byte alignment
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::{Result, SkipError};

use super::MAX_LEVEL;

/// Byte length of the fixed record head (before the pointer slots)
pub const RECORD_HEAD: u64 = 20;

/// Record kind discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// The skip-index head sentinel (exactly one, at HEAD_OFFSET)
    Head,
    /// A live key/value record
    Add,
    /// A deletion marker, retained until compaction
    Tombstone,
}

impl RecordKind {
    fn to_byte(self) -> u8 {
        match self {
            RecordKind::Head => 1,
            RecordKind::Add => 2,
            RecordKind::Tombstone => 3,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(RecordKind::Head),
            2 => Ok(RecordKind::Add),
            3 => Ok(RecordKind::Tombstone),
            _ => Err(SkipError::internal(format!("bad record kind: {}", b))),
        }
    }
}

/// A decoded record plus its location in the file
#[derive(Debug, Clone)]
pub struct Record {
    /// Byte offset of this record in the file
    pub offset: u64,
    pub kind: RecordKind,
    /// Number of forward pointer slots (1..=MAX_LEVEL)
    pub level: u8,
    /// Offset of the record version this one supersedes (0 = none)
    pub prev_version: u64,
    /// Forward pointer slot values, `level` entries
    pub next: Vec<u64>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    /// Total on-disk length of a record with the given shape, including
    /// alignment padding
    pub fn disk_len(level: u8, key_len: usize, val_len: usize) -> u64 {
        super::align8(RECORD_HEAD + 8 * level as u64 + 4 + key_len as u64 + val_len as u64)
    }

    /// This record's total on-disk length
    pub fn len(&self) -> u64 {
        Self::disk_len(self.level, self.key.len(), self.value.len())
    }

    /// File offset of the pointer slot for `level` within the record at
    /// `record_off`
    pub fn slot_offset(record_off: u64, level: usize) -> u64 {
        record_off + RECORD_HEAD + 8 * level as u64
    }

    /// Checksum over the immutable bytes: fixed head, key, value.
    /// Pointer slots are mutated in place after the fact, so they are
    /// excluded.
    fn checksum_of(head: &[u8], key: &[u8], value: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&head[..RECORD_HEAD as usize]);
        hasher.update(key);
        hasher.update(value);
        hasher.finalize()
    }

    /// Serialize to the on-disk layout. With `nochecksum` the checksum
    /// field is written as zero.
    pub fn encode(&self, nochecksum: bool) -> BytesMut {
        debug_assert!(self.level >= 1 && self.level as usize <= MAX_LEVEL);
        debug_assert_eq!(self.next.len(), self.level as usize);

        let total = self.len() as usize;
        let mut buf = BytesMut::with_capacity(total);

        buf.put_u8(self.kind.to_byte());
        buf.put_u8(self.level);
        buf.put_u16_le(0);
        buf.put_u32_le(self.key.len() as u32);
        buf.put_u32_le(self.value.len() as u32);
        buf.put_u64_le(self.prev_version);
        for &n in &self.next {
            buf.put_u64_le(n);
        }

        let crc = if nochecksum {
            0
        } else {
            Self::checksum_of(&buf[..], &self.key, &self.value)
        };
        buf.put_u32_le(crc);
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);
        buf.resize(total, 0); // alignment padding

        buf
    }

    /// Parse the fixed head, returning (kind, level, key_len, val_len,
    /// prev_version). Validates shape but not the checksum.
    pub fn decode_head(buf: &[u8], offset: u64) -> Result<(RecordKind, u8, u32, u32, u64)> {
        if buf.len() < RECORD_HEAD as usize {
            return Err(SkipError::internal(format!(
                "short record head at offset {}",
                offset
            )));
        }
        let kind = RecordKind::from_byte(buf[0])
            .map_err(|_| SkipError::internal(format!("bad record kind at offset {}", offset)))?;
        let level = buf[1];
        if level == 0 || level as usize > MAX_LEVEL {
            return Err(SkipError::internal(format!(
                "bad record level {} at offset {}",
                level, offset
            )));
        }
        let key_len = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let val_len = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let prev_version = u64::from_le_bytes(buf[12..20].try_into().unwrap());
        Ok((kind, level, key_len, val_len, prev_version))
    }

    /// Parse a full record from `buf`, which must hold the unpadded record
    /// bytes starting at file offset `offset`. Verifies the checksum unless
    /// `nochecksum`.
    pub fn decode(buf: &[u8], offset: u64, nochecksum: bool) -> Result<Record> {
        let (kind, level, key_len, val_len, prev_version) = Self::decode_head(buf, offset)?;

        let slots_at = RECORD_HEAD as usize;
        let crc_at = slots_at + 8 * level as usize;
        let key_at = crc_at + 4;
        let val_at = key_at + key_len as usize;
        let end = val_at + val_len as usize;
        if buf.len() < end {
            return Err(SkipError::internal(format!(
                "truncated record at offset {}",
                offset
            )));
        }

        let mut next = Vec::with_capacity(level as usize);
        for l in 0..level as usize {
            let at = slots_at + 8 * l;
            next.push(u64::from_le_bytes(buf[at..at + 8].try_into().unwrap()));
        }

        let key = buf[key_at..val_at].to_vec();
        let value = buf[val_at..end].to_vec();

        if !nochecksum {
            let stored = u32::from_le_bytes(buf[crc_at..crc_at + 4].try_into().unwrap());
            let computed = Self::checksum_of(buf, &key, &value);
            if stored != computed {
                return Err(SkipError::internal(format!(
                    "record checksum mismatch at offset {}: stored {:08x}, computed {:08x}",
                    offset, stored, computed
                )));
            }
        }

        Ok(Record {
            offset,
            kind,
            level,
            prev_version,
            next,
            key,
            value,
        })
    }
}
