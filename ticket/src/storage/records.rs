//! Flat files of fixed-width records.
//!
//! A record file starts with the record count as an `i32`, followed by the
//! records back to back: record `i` lives at `4 + i * T::WIDTH`. Records are
//! only ever appended or overwritten in place, so a position handed out by
//! [`RecordFile::push`] stays valid until [`RecordFile::clear`].
//!
//! Like the tree header, the count is kept in memory and written back on
//! flush and on drop.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::storage::codec::{CodecError, FixedCodec, read_i32, write_i32};

/// Size of the count header.
const COUNT_SIZE: u64 = 4;

/// An append-only array of `T` on disk.
pub struct RecordFile<T> {
    file: File,
    path: PathBuf,
    len: u32,
    dirty: bool,
    _marker: PhantomData<T>,
}

impl<T: FixedCodec> RecordFile<T> {
    /// Open the record file at `path`, creating an empty one if needed.
    pub fn open(path: &Path) -> Result<Self, RecordError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(RecordError::Io)?;

        let len = if file.metadata().map_err(RecordError::Io)?.len() == 0 {
            file.write_all(&0i32.to_le_bytes()).map_err(RecordError::Io)?;
            0
        } else {
            let mut buf = [0u8; 4];
            file.read_exact(&mut buf).map_err(RecordError::Io)?;
            let raw = read_i32(&buf, 0);
            u32::try_from(raw).map_err(|_| RecordError::CorruptCount(raw))?
        };

        tracing::debug!(path = %path.display(), records = len, "opened record file");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
            dirty: false,
            _marker: PhantomData,
        })
    }

    #[must_use]
    pub const fn len(&self) -> u32 {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a record and return its position.
    pub fn push(&mut self, record: &T) -> Result<u32, RecordError> {
        if i32::try_from(self.len).is_err() {
            return Err(RecordError::Full);
        }
        let pos = self.len;
        self.len += 1;
        self.dirty = true;
        self.write(pos, record)?;
        Ok(pos)
    }

    pub fn read(&mut self, pos: u32) -> Result<T, RecordError> {
        let mut buf = vec![0u8; T::WIDTH];
        self.read_at(pos, &mut buf)?;
        Ok(T::decode(&buf)?)
    }

    pub fn write(&mut self, pos: u32, record: &T) -> Result<(), RecordError> {
        let mut buf = vec![0u8; T::WIDTH];
        record.encode(&mut buf);
        self.write_at(pos, &buf)
    }

    /// Read the leading `P::WIDTH` bytes of a record as a `P`.
    ///
    /// Record types keep their frequently updated flag in front so it can be
    /// touched without moving the whole record.
    pub fn read_prefix<P: FixedCodec>(&mut self, pos: u32) -> Result<P, RecordError> {
        debug_assert!(P::WIDTH <= T::WIDTH);
        let mut buf = vec![0u8; P::WIDTH];
        self.read_at(pos, &mut buf)?;
        Ok(P::decode(&buf)?)
    }

    /// Overwrite the leading `P::WIDTH` bytes of a record.
    pub fn write_prefix<P: FixedCodec>(&mut self, pos: u32, prefix: &P) -> Result<(), RecordError> {
        debug_assert!(P::WIDTH <= T::WIDTH);
        let mut buf = vec![0u8; P::WIDTH];
        prefix.encode(&mut buf);
        self.write_at(pos, &buf)
    }

    /// Persist the record count.
    pub fn flush(&mut self) -> Result<(), RecordError> {
        if !self.dirty {
            return Ok(());
        }
        self.write_count().map_err(RecordError::Io)?;
        self.dirty = false;
        Ok(())
    }

    /// Drop every record.
    pub fn clear(&mut self) -> Result<(), RecordError> {
        self.file.set_len(COUNT_SIZE).map_err(RecordError::Io)?;
        self.len = 0;
        self.dirty = true;
        self.flush()
    }

    fn write_count(&mut self) -> std::io::Result<()> {
        let mut buf = [0u8; 4];
        write_i32(&mut buf, 0, i32::try_from(self.len).unwrap_or(i32::MAX));
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        self.file.flush()
    }

    fn offset(&self, pos: u32) -> Result<u64, RecordError> {
        if pos >= self.len {
            return Err(RecordError::OutOfBounds { pos, len: self.len });
        }
        Ok(COUNT_SIZE + u64::from(pos) * T::WIDTH as u64)
    }

    fn read_at(&mut self, pos: u32, buf: &mut [u8]) -> Result<(), RecordError> {
        let offset = self.offset(pos)?;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(RecordError::Io)?;
        self.file.read_exact(buf).map_err(RecordError::Io)
    }

    fn write_at(&mut self, pos: u32, buf: &[u8]) -> Result<(), RecordError> {
        let offset = self.offset(pos)?;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(RecordError::Io)?;
        self.file.write_all(buf).map_err(RecordError::Io)
    }
}

impl<T> Drop for RecordFile<T> {
    fn drop(&mut self) {
        if !self.dirty {
            return;
        }
        let mut buf = [0u8; 4];
        write_i32(&mut buf, 0, i32::try_from(self.len).unwrap_or(i32::MAX));
        let result = self
            .file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&buf))
            .and_then(|()| self.file.flush());
        if let Err(e) = result {
            tracing::error!(path = %self.path.display(), "failed to write record count on close: {e}");
        }
    }
}

/// Errors that can occur during record I/O.
#[derive(Debug)]
pub enum RecordError {
    /// Underlying I/O error.
    Io(std::io::Error),
    /// A record failed to decode.
    Codec(CodecError),
    /// Position past the last record.
    OutOfBounds { pos: u32, len: u32 },
    /// The stored record count is negative.
    CorruptCount(i32),
    /// The count no longer fits the on-disk field.
    Full,
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Codec(e) => write!(f, "corrupt record: {e}"),
            Self::OutOfBounds { pos, len } => {
                write!(f, "record {pos} out of bounds ({len} records)")
            }
            Self::CorruptCount(count) => write!(f, "corrupt record count: {count}"),
            Self::Full => write!(f, "record file is full"),
        }
    }
}

impl std::error::Error for RecordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::OutOfBounds { .. } | Self::CorruptCount(_) | Self::Full => None,
        }
    }
}

impl From<CodecError> for RecordError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pair;
    use tempfile::tempdir;

    type Row = Pair<bool, i32>;

    fn create_test_file() -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("Rows.dat");
        (dir, path)
    }

    #[test]
    fn test_push_and_read() {
        let (_dir, path) = create_test_file();
        let mut rows = RecordFile::<Row>::open(&path).expect("open");
        assert!(rows.is_empty());

        assert_eq!(rows.push(&Pair::new(false, 10)).expect("push"), 0);
        assert_eq!(rows.push(&Pair::new(true, 20)).expect("push"), 1);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.read(1).expect("read"), Pair::new(true, 20));

        rows.write(0, &Pair::new(false, 11)).expect("write");
        assert_eq!(rows.read(0).expect("read"), Pair::new(false, 11));
    }

    #[test]
    fn test_prefix_io() {
        let (_dir, path) = create_test_file();
        let mut rows = RecordFile::<Row>::open(&path).expect("open");
        let pos = rows.push(&Pair::new(false, 7)).expect("push");

        assert!(!rows.read_prefix::<bool>(pos).expect("read flag"));
        rows.write_prefix(pos, &true).expect("write flag");
        assert_eq!(rows.read(pos).expect("read"), Pair::new(true, 7));
    }

    #[test]
    fn test_out_of_bounds() {
        let (_dir, path) = create_test_file();
        let mut rows = RecordFile::<Row>::open(&path).expect("open");
        rows.push(&Row::default()).expect("push");

        assert!(matches!(
            rows.read(1),
            Err(RecordError::OutOfBounds { pos: 1, len: 1 })
        ));
        assert!(rows.write(5, &Row::default()).is_err());
    }

    #[test]
    fn test_count_persists_across_reopen() {
        let (_dir, path) = create_test_file();
        {
            let mut rows = RecordFile::<Row>::open(&path).expect("open");
            for i in 0..5 {
                rows.push(&Pair::new(i % 2 == 0, i)).expect("push");
            }
        }

        let mut rows = RecordFile::<Row>::open(&path).expect("reopen");
        assert_eq!(rows.len(), 5);
        assert_eq!(rows.read(4).expect("read"), Pair::new(true, 4));
    }

    #[test]
    fn test_clear() {
        let (_dir, path) = create_test_file();
        let mut rows = RecordFile::<Row>::open(&path).expect("open");
        rows.push(&Row::default()).expect("push");
        rows.clear().expect("clear");

        assert!(rows.is_empty());
        assert_eq!(std::fs::metadata(&path).expect("metadata").len(), COUNT_SIZE);
        assert_eq!(rows.push(&Pair::new(true, 1)).expect("push"), 0);
    }
}
