//! Tree file header.
//!
//! The first [`HEADER_SIZE`] bytes of every tree file describe the tree: its
//! geometry, the root slot, the high-water mark and the stack of recycled
//! slots. The header is read once at open and written back on flush.

// Header sizes and the free-stack capacity are compile-time constants that fit in i32.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use crate::storage::btree::slot::{NO_SLOT, SlotId};
use crate::storage::codec::{read_i32, read_u32, write_i32, write_u32};

/// Magic number identifying a tree file: "TKTBTREE"
pub const MAGIC: [u8; 8] = *b"TKTBTREE";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the header region in bytes. Slot 0 starts right after it.
pub const HEADER_SIZE: usize = 4096;

/// Maximum number of recycled slots remembered for reuse.
pub const FREE_STACK_CAPACITY: usize = 1000;

/// Header field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 8;
    pub const ORDER: usize = 12;
    pub const ENTRY_WIDTH: usize = 16;
    pub const LAST_USED: usize = 20;
    pub const ROOT: usize = 24;
    pub const FREE_COUNT: usize = 28;
    pub const FREE_SLOTS: usize = 32;
    // 32 + 4 * FREE_STACK_CAPACITY = 4032; 4032-4091 reserved
    pub const CHECKSUM: usize = 4092;
}

/// Metadata for one tree file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeHeader {
    /// Node capacity M.
    pub order: u32,
    /// Encoded width of one (key, value) entry.
    pub entry_width: u32,
    /// Highest slot ever handed out, `None` for a fresh file.
    pub last_used: Option<SlotId>,
    /// Root slot, `None` for an empty tree.
    pub root: Option<SlotId>,
    /// Recycled slots, reused last-in first-out.
    pub free_slots: Vec<SlotId>,
}

impl TreeHeader {
    /// Create a header for an empty tree.
    #[must_use]
    pub const fn new(order: u32, entry_width: u32) -> Self {
        Self {
            order,
            entry_width,
            last_used: None,
            root: None,
            free_slots: Vec::new(),
        }
    }

    /// Serialize the header, including its checksum.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE];

        buf[offsets::MAGIC..offsets::MAGIC + 8].copy_from_slice(&MAGIC);
        write_u32(&mut buf, offsets::FORMAT_VERSION, FORMAT_VERSION);
        write_u32(&mut buf, offsets::ORDER, self.order);
        write_u32(&mut buf, offsets::ENTRY_WIDTH, self.entry_width);
        write_i32(&mut buf, offsets::LAST_USED, SlotId::to_raw(self.last_used));
        write_i32(&mut buf, offsets::ROOT, SlotId::to_raw(self.root));
        write_i32(&mut buf, offsets::FREE_COUNT, self.free_slots.len() as i32);
        for (i, slot) in self.free_slots.iter().enumerate() {
            write_i32(&mut buf, offsets::FREE_SLOTS + 4 * i, SlotId::to_raw(Some(*slot)));
        }

        let checksum = crc32fast::hash(&buf[..offsets::CHECKSUM]);
        write_u32(&mut buf, offsets::CHECKSUM, checksum);
        buf
    }

    /// Deserialize and validate a header.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, HeaderError> {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[offsets::MAGIC..offsets::MAGIC + 8]);
        if magic != MAGIC {
            return Err(HeaderError::InvalidMagic(magic));
        }

        let format_version = read_u32(buf, offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(HeaderError::UnsupportedVersion(format_version));
        }

        let stored = read_u32(buf, offsets::CHECKSUM);
        let computed = crc32fast::hash(&buf[..offsets::CHECKSUM]);
        if stored != computed {
            return Err(HeaderError::ChecksumMismatch { stored, computed });
        }

        let slot = |offset: usize| SlotId::from_raw(read_i32(buf, offset)).map_err(HeaderError::CorruptSlot);

        let free_count = read_i32(buf, offsets::FREE_COUNT);
        let free_count = usize::try_from(free_count)
            .ok()
            .filter(|&n| n <= FREE_STACK_CAPACITY)
            .ok_or(HeaderError::CorruptFreeStack(free_count))?;
        let mut free_slots = Vec::with_capacity(free_count);
        for i in 0..free_count {
            let free = slot(offsets::FREE_SLOTS + 4 * i)?
                .ok_or(HeaderError::CorruptSlot(NO_SLOT))?;
            free_slots.push(free);
        }

        Ok(Self {
            order: read_u32(buf, offsets::ORDER),
            entry_width: read_u32(buf, offsets::ENTRY_WIDTH),
            last_used: slot(offsets::LAST_USED)?,
            root: slot(offsets::ROOT)?,
            free_slots,
        })
    }
}

/// Errors that can occur when reading a tree header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Stored checksum does not match the header contents.
    ChecksumMismatch { stored: u32, computed: u32 },
    /// A slot reference is negative but not the "none" sentinel.
    CorruptSlot(i32),
    /// The free-stack length is out of range.
    CorruptFreeStack(i32),
    /// The file was created for a different node layout.
    GeometryMismatch {
        expected_order: u32,
        found_order: u32,
        expected_entry_width: u32,
        found_entry_width: u32,
    },
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::ChecksumMismatch { stored, computed } => {
                write!(f, "header checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")
            }
            Self::CorruptSlot(raw) => write!(f, "corrupt slot reference: {raw}"),
            Self::CorruptFreeStack(count) => write!(f, "corrupt free stack length: {count}"),
            Self::GeometryMismatch {
                expected_order,
                found_order,
                expected_entry_width,
                found_entry_width,
            } => write!(
                f,
                "tree geometry mismatch: expected order {expected_order} with {expected_entry_width}-byte entries, \
                 found order {found_order} with {found_entry_width}-byte entries"
            ),
        }
    }
}

impl std::error::Error for HeaderError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut header = TreeHeader::new(6, 28);
        header.last_used = Some(SlotId(41));
        header.root = Some(SlotId(17));
        header.free_slots = vec![SlotId(3), SlotId(9)];

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);

        let restored = TreeHeader::from_bytes(&bytes).expect("should parse");
        assert_eq!(restored, header);
    }

    #[test]
    fn test_fresh_header_uses_sentinels() {
        let bytes = TreeHeader::new(3, 8).to_bytes();
        assert_eq!(read_i32(&bytes, offsets::LAST_USED), -1);
        assert_eq!(read_i32(&bytes, offsets::ROOT), -1);
        assert_eq!(read_i32(&bytes, offsets::FREE_COUNT), 0);
    }

    #[test]
    fn test_header_invalid_magic() {
        let mut bytes = TreeHeader::new(3, 8).to_bytes();
        bytes[..8].copy_from_slice(b"BADMAGIC");

        let result = TreeHeader::from_bytes(&bytes);
        assert!(matches!(result, Err(HeaderError::InvalidMagic(_))));
    }

    #[test]
    fn test_header_detects_corruption() {
        let mut bytes = TreeHeader::new(3, 8).to_bytes();
        write_i32(&mut bytes, offsets::ROOT, 12);

        let result = TreeHeader::from_bytes(&bytes);
        assert!(matches!(result, Err(HeaderError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_free_stack_at_capacity() {
        let mut header = TreeHeader::new(3, 8);
        header.free_slots = (0..FREE_STACK_CAPACITY as u32).map(SlotId).collect();

        let restored = TreeHeader::from_bytes(&header.to_bytes()).expect("should parse");
        assert_eq!(restored.free_slots.len(), FREE_STACK_CAPACITY);
        assert_eq!(restored.free_slots.last(), Some(&SlotId(999)));
    }
}
