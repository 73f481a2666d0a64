//! Fixed-width binary encoding.
//!
//! Every value that lands in a tree slot or a record file has a width known at
//! compile time. Integers are little-endian.

/// A value with a fixed on-disk width.
pub trait FixedCodec: Sized {
    /// Encoded size in bytes.
    const WIDTH: usize;

    /// Write the value into `buf[..Self::WIDTH]`.
    fn encode(&self, buf: &mut [u8]);

    /// Read a value from `buf[..Self::WIDTH]`.
    fn decode(buf: &[u8]) -> Result<Self, CodecError>;
}

/// Read a little-endian `i32` at `offset`.
#[must_use]
pub fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Write a little-endian `i32` at `offset`.
pub fn write_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Read a little-endian `u32` at `offset`.
#[must_use]
pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Write a little-endian `u32` at `offset`.
pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Encode `items` back to back starting at `buf[0]`.
pub fn encode_slice<T: FixedCodec>(items: &[T], buf: &mut [u8]) {
    for (i, item) in items.iter().enumerate() {
        item.encode(&mut buf[i * T::WIDTH..]);
    }
}

/// Decode `count` consecutive values starting at `buf[0]`.
pub fn decode_vec<T: FixedCodec>(buf: &[u8], count: usize) -> Result<Vec<T>, CodecError> {
    (0..count).map(|i| T::decode(&buf[i * T::WIDTH..])).collect()
}

/// Decode an element count stored as `i32`, rejecting anything outside `0..=max`.
pub fn decode_count(buf: &[u8], offset: usize, field: &'static str, max: usize) -> Result<usize, CodecError> {
    let value = read_i32(buf, offset);
    match usize::try_from(value) {
        Ok(count) if count <= max => Ok(count),
        _ => Err(CodecError::InvalidLength { field, value, max }),
    }
}

impl FixedCodec for i32 {
    const WIDTH: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        write_i32(buf, 0, *self);
    }

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        Ok(read_i32(buf, 0))
    }
}

impl FixedCodec for u32 {
    const WIDTH: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        write_u32(buf, 0, *self);
    }

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        Ok(read_u32(buf, 0))
    }
}

impl FixedCodec for u8 {
    const WIDTH: usize = 1;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self;
    }

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        Ok(buf[0])
    }
}

impl FixedCodec for bool {
    const WIDTH: usize = 1;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = u8::from(*self);
    }

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        match buf[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidFlag(i32::from(other))),
        }
    }
}

/// Errors produced while decoding fixed-width values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A boolean or status field held an unknown value.
    InvalidFlag(i32),
    /// A slot reference is negative but not the "none" sentinel.
    InvalidSlot(i32),
    /// A stored element count is negative or exceeds its capacity.
    InvalidLength {
        field: &'static str,
        value: i32,
        max: usize,
    },
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidFlag(value) => write!(f, "invalid flag value: {value}"),
            Self::InvalidSlot(raw) => write!(f, "invalid slot reference: {raw}"),
            Self::InvalidLength { field, value, max } => {
                write!(f, "invalid {field} count {value} (max {max})")
            }
        }
    }
}

impl std::error::Error for CodecError {}
