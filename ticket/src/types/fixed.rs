//! Fixed-width text fields.
//!
//! Identifiers and free text are stored as NUL-padded byte arrays so that
//! records and tree slots keep a constant width. Ordering is plain byte order,
//! which matches `strcmp` on the unpadded strings.

use std::borrow::Cow;
use std::fmt;

use crate::storage::codec::{CodecError, FixedCodec};

/// A NUL-padded string of at most `N` bytes.
///
/// # Invariants
///
/// - The meaningful bytes are a prefix; every byte after the first NUL is NUL.
/// - Truncation never splits a UTF-8 code point.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedStr<const N: usize>(pub [u8; N]);

/// Usernames.
pub type UserName = FixedStr<24>;

/// Train identifiers.
pub type TrainId = FixedStr<24>;

/// Passwords, display names and mail addresses.
pub type Text = FixedStr<32>;

/// Station names (up to ten CJK characters plus slack).
pub type StationName = FixedStr<48>;

impl<const N: usize> FixedStr<N> {
    /// Create a fixed string from `s`, truncated at a character boundary if
    /// it is longer than `N` bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use ticket::types::UserName;
    /// let name = UserName::from_string("alice");
    /// assert_eq!(name.to_string(), "alice");
    /// ```
    #[must_use]
    pub fn from_string(s: &str) -> Self {
        let mut len = s.len().min(N);
        while !s.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0u8; N];
        bytes[..len].copy_from_slice(&s.as_bytes()[..len]);
        Self(bytes)
    }

    /// Length of the meaningful prefix in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.iter().position(|&b| b == 0).unwrap_or(N)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }

    /// The stored text, lossily decoded.
    #[must_use]
    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0[..self.len()])
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self([0u8; N])
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl<const N: usize> From<&str> for FixedStr<N> {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl<const N: usize> FixedCodec for FixedStr<N> {
    const WIDTH: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self.0);
    }

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&buf[..N]);
        Ok(Self(bytes))
    }
}
