//! Two-field composite keys.

use std::fmt;

use crate::storage::codec::{CodecError, FixedCodec};

/// A pair ordered by `first`, then by `second`.
///
/// Tree entries are `Pair<K, V>`, which is what gives the index its multimap
/// ordering. Services also use pairs as keys, e.g. `(train slot, day offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pair<A, B> {
    pub first: A,
    pub second: B,
}

impl<A, B> Pair<A, B> {
    #[must_use]
    pub const fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: fmt::Display, B: fmt::Display> fmt::Display for Pair<A, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.first, self.second)
    }
}

impl<A: FixedCodec, B: FixedCodec> FixedCodec for Pair<A, B> {
    const WIDTH: usize = A::WIDTH + B::WIDTH;

    fn encode(&self, buf: &mut [u8]) {
        self.first.encode(buf);
        self.second.encode(&mut buf[A::WIDTH..]);
    }

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            first: A::decode(buf)?,
            second: B::decode(&buf[A::WIDTH..])?,
        })
    }
}
