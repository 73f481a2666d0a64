//! Slot indices.
//!
//! A slot is the fixed-size region of a tree file that holds one node. On
//! disk a slot reference is an `i32` where `-1` means "none"; in memory it is
//! `Option<SlotId>`, so a negative index cannot be expressed.

use std::fmt;

/// Index of a node slot within a tree file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub u32);

/// On-disk encoding of "no slot".
pub const NO_SLOT: i32 = -1;

impl SlotId {
    #[must_use]
    pub const fn index(self) -> u64 {
        self.0 as u64
    }

    /// Convert to the on-disk representation.
    #[must_use]
    pub fn to_raw(slot: Option<Self>) -> i32 {
        slot.map_or(NO_SLOT, |s| i32::try_from(s.0).unwrap_or(NO_SLOT))
    }

    /// Convert from the on-disk representation.
    ///
    /// Returns `Err(raw)` for negative values other than [`NO_SLOT`].
    pub fn from_raw(raw: i32) -> Result<Option<Self>, i32> {
        if raw == NO_SLOT {
            return Ok(None);
        }
        u32::try_from(raw).map(|index| Some(Self(index))).map_err(|_| raw)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
