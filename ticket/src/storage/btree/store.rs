//! Paged node storage for one tree file.
//!
//! The file is a [`HEADER_SIZE`] header followed by an array of fixed-size
//! slots; slot `s` starts at `HEADER_SIZE + s * slot_width`. Slots are handed
//! out from the recycled stack first and from the high-water mark otherwise.
//!
//! Metadata (root, high-water mark, free stack) lives in memory between
//! [`NodeStore::open`] and [`NodeStore::flush`]; a crash in between loses the
//! latest metadata.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::storage::btree::header::{
    FREE_STACK_CAPACITY, HEADER_SIZE, HeaderError, TreeHeader,
};
use crate::storage::btree::node::{Node, SlotLayout};
use crate::storage::btree::slot::SlotId;
use crate::storage::codec::{CodecError, FixedCodec, decode_count, write_i32};

/// Offset of the entry count within a slot.
const COUNT_OFFSET: u64 = 4;

/// Largest slot index representable on disk.
const MAX_SLOT: u32 = i32::MAX.unsigned_abs();

/// Slot I/O and allocation for a tree of `Node<K, V>`.
pub struct NodeStore<K, V> {
    file: File,
    path: PathBuf,
    layout: SlotLayout,
    header: TreeHeader,
    dirty: bool,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> NodeStore<K, V>
where
    K: FixedCodec + Ord + Copy,
    V: FixedCodec + Ord + Copy,
{
    /// Open the tree file at `path`, creating it if it does not exist.
    ///
    /// An existing file must have been created with the same `order` and
    /// entry width.
    pub fn open(path: &Path, order: usize) -> Result<Self, SlotError> {
        let layout = SlotLayout::new(order, Node::<K, V>::ENTRY_WIDTH);
        let expected = TreeHeader::new(
            u32::try_from(order).map_err(|_| SlotError::InvalidOrder(order))?,
            u32::try_from(layout.entry_width).map_err(|_| SlotError::InvalidOrder(order))?,
        );

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(SlotError::Io)?;

        let file_len = file.metadata().map_err(SlotError::Io)?.len();
        let header = if file_len == 0 {
            file.write_all(&expected.to_bytes()).map_err(SlotError::Io)?;
            tracing::debug!(path = %path.display(), order, "created tree file");
            expected
        } else {
            let mut buf = vec![0u8; HEADER_SIZE];
            file.read_exact(&mut buf).map_err(SlotError::Io)?;
            let header = TreeHeader::from_bytes(&buf)?;
            if header.order != expected.order || header.entry_width != expected.entry_width {
                return Err(SlotError::Header(HeaderError::GeometryMismatch {
                    expected_order: expected.order,
                    found_order: header.order,
                    expected_entry_width: expected.entry_width,
                    found_entry_width: header.entry_width,
                }));
            }
            header
        };

        Ok(Self {
            file,
            path: path.to_path_buf(),
            layout,
            header,
            dirty: false,
            _marker: PhantomData,
        })
    }

    #[must_use]
    pub const fn layout(&self) -> SlotLayout {
        self.layout
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn root(&self) -> Option<SlotId> {
        self.header.root
    }

    pub fn set_root(&mut self, root: Option<SlotId>) {
        self.header.root = root;
        self.dirty = true;
    }

    /// Number of slots ever handed out.
    #[must_use]
    pub fn high_water(&self) -> u32 {
        self.header.last_used.map_or(0, |slot| slot.0 + 1)
    }

    /// Number of recycled slots waiting for reuse.
    #[must_use]
    pub fn free_len(&self) -> usize {
        self.header.free_slots.len()
    }

    /// Hand out a slot, preferring recycled ones.
    pub fn allocate(&mut self) -> Result<SlotId, SlotError> {
        self.dirty = true;
        if let Some(slot) = self.header.free_slots.pop() {
            return Ok(slot);
        }
        let next = match self.header.last_used {
            None => 0,
            Some(SlotId(last)) if last < MAX_SLOT => last + 1,
            Some(_) => return Err(SlotError::Exhausted),
        };
        let slot = SlotId(next);
        self.header.last_used = Some(slot);
        Ok(slot)
    }

    /// Return a slot for reuse.
    ///
    /// The free stack is bounded; once it is full the slot is leaked and
    /// stays unused in the file.
    pub fn recycle(&mut self, slot: SlotId) {
        if self.header.free_slots.len() >= FREE_STACK_CAPACITY {
            tracing::warn!(
                path = %self.path.display(),
                %slot,
                "free slot stack full, leaking slot"
            );
            return;
        }
        self.header.free_slots.push(slot);
        self.dirty = true;
    }

    /// Read a whole node, children included.
    pub fn read_full(&mut self, slot: SlotId) -> Result<Node<K, V>, SlotError> {
        let mut buf = vec![0u8; self.layout.slot_width()];
        self.read_at(slot, 0, &mut buf)?;
        Ok(Node::decode(&buf, self.layout, true)?)
    }

    /// Read a node without its child array.
    pub fn read_header(&mut self, slot: SlotId) -> Result<Node<K, V>, SlotError> {
        let mut buf = vec![0u8; self.layout.header_width()];
        self.read_at(slot, 0, &mut buf)?;
        Ok(Node::decode(&buf, self.layout, false)?)
    }

    /// Read only the entry count of a node.
    pub fn read_count(&mut self, slot: SlotId) -> Result<usize, SlotError> {
        let mut buf = [0u8; 4];
        self.read_at(slot, COUNT_OFFSET, &mut buf)?;
        Ok(decode_count(&buf, 0, "entry", self.layout.order)?)
    }

    /// Write a whole node, children included.
    pub fn write_full(&mut self, slot: SlotId, node: &Node<K, V>) -> Result<(), SlotError> {
        let mut buf = vec![0u8; self.layout.slot_width()];
        node.encode(&mut buf, self.layout);
        self.write_at(slot, 0, &buf)
    }

    /// Write a node's header, leaving the stored child array as it is.
    pub fn write_header(&mut self, slot: SlotId, node: &Node<K, V>) -> Result<(), SlotError> {
        let mut buf = vec![0u8; self.layout.header_width()];
        node.encode(&mut buf, self.layout);
        self.write_at(slot, 0, &buf)
    }

    /// Overwrite only the entry count of a node.
    pub fn write_count(&mut self, slot: SlotId, count: usize) -> Result<(), SlotError> {
        let mut buf = [0u8; 4];
        write_i32(&mut buf, 0, i32::try_from(count).unwrap_or(i32::MAX));
        self.write_at(slot, COUNT_OFFSET, &buf)
    }

    /// Persist the metadata header.
    pub fn flush(&mut self) -> Result<(), SlotError> {
        if !self.dirty {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(0)).map_err(SlotError::Io)?;
        self.file
            .write_all(&self.header.to_bytes())
            .map_err(SlotError::Io)?;
        self.file.flush().map_err(SlotError::Io)?;
        self.dirty = false;
        Ok(())
    }

    /// Drop every slot and reset the file to an empty tree.
    pub fn clear(&mut self) -> Result<(), SlotError> {
        self.header = TreeHeader::new(self.header.order, self.header.entry_width);
        self.file.set_len(0).map_err(SlotError::Io)?;
        self.dirty = true;
        self.flush()
    }

    fn offset(&self, slot: SlotId) -> Result<u64, SlotError> {
        let high_water = self.high_water();
        if slot.0 >= high_water {
            return Err(SlotError::OutOfBounds { slot, high_water });
        }
        Ok(HEADER_SIZE as u64 + slot.index() * self.layout.slot_width() as u64)
    }

    fn read_at(&mut self, slot: SlotId, within: u64, buf: &mut [u8]) -> Result<(), SlotError> {
        let offset = self.offset(slot)? + within;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(SlotError::Io)?;
        self.file.read_exact(buf).map_err(SlotError::Io)
    }

    fn write_at(&mut self, slot: SlotId, within: u64, buf: &[u8]) -> Result<(), SlotError> {
        let offset = self.offset(slot)? + within;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(SlotError::Io)?;
        self.file.write_all(buf).map_err(SlotError::Io)
    }
}

impl<K, V> Drop for NodeStore<K, V> {
    fn drop(&mut self) {
        if !self.dirty {
            return;
        }
        let bytes = self.header.to_bytes();
        let result = self
            .file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&bytes))
            .and_then(|()| self.file.flush());
        if let Err(e) = result {
            tracing::error!(path = %self.path.display(), "failed to write tree header on close: {e}");
        }
    }
}

/// Errors that can occur during slot I/O.
#[derive(Debug)]
pub enum SlotError {
    /// Underlying I/O error.
    Io(std::io::Error),
    /// The tree header is invalid or does not match.
    Header(HeaderError),
    /// A slot held bytes that do not decode to a node.
    Codec(CodecError),
    /// Slot index beyond the high-water mark.
    OutOfBounds { slot: SlotId, high_water: u32 },
    /// Order too large to be stored.
    InvalidOrder(usize),
    /// No slot index left to hand out.
    Exhausted,
}

impl std::fmt::Display for SlotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Header(e) => write!(f, "header error: {e}"),
            Self::Codec(e) => write!(f, "corrupt slot: {e}"),
            Self::OutOfBounds { slot, high_water } => {
                write!(f, "slot {slot} out of bounds (high-water mark: {high_water})")
            }
            Self::InvalidOrder(order) => write!(f, "invalid tree order: {order}"),
            Self::Exhausted => write!(f, "slot indices exhausted"),
        }
    }
}

impl std::error::Error for SlotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Header(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::OutOfBounds { .. } | Self::InvalidOrder(_) | Self::Exhausted => None,
        }
    }
}

impl From<HeaderError> for SlotError {
    fn from(e: HeaderError) -> Self {
        Self::Header(e)
    }
}

impl From<CodecError> for SlotError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}
