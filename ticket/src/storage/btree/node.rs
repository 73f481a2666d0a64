//! B+ tree nodes and their slot layout.
//!
//! Every node of a tree occupies one fixed-size slot. With `M` the order and
//! `E` the encoded width of a `(key, value)` entry, a slot is laid out as:
//!
//! | offset      | size            | field                            |
//! |-------------|-----------------|----------------------------------|
//! | 0           | 4               | `is_leaf` (0 or 1)               |
//! | 4           | 4               | entry count                      |
//! | 8           | 4               | next leaf slot, -1 for none      |
//! | 12          | `M * E`         | entries, sorted                  |
//! | 12 + `M*E`  | `(M + 1) * 4`   | child slots (internal nodes only)|
//!
//! Everything up to the child array is the node "header"; leaves never need
//! more than that.

use crate::storage::btree::slot::SlotId;
use crate::storage::codec::{CodecError, FixedCodec, decode_count, read_i32, write_i32};
use crate::types::Pair;

/// Byte geometry of a slot for a given order and entry width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub order: usize,
    pub entry_width: usize,
}

impl SlotLayout {
    const ENTRIES_OFFSET: usize = 12;

    #[must_use]
    pub const fn new(order: usize, entry_width: usize) -> Self {
        Self { order, entry_width }
    }

    /// Bytes covering `is_leaf`, count, next and the entry array.
    #[must_use]
    pub const fn header_width(&self) -> usize {
        Self::ENTRIES_OFFSET + self.order * self.entry_width
    }

    /// Bytes of a whole slot.
    #[must_use]
    pub const fn slot_width(&self) -> usize {
        self.header_width() + (self.order + 1) * 4
    }
}

/// A tree node.
///
/// Entries are `(key, value)` pairs in strictly ascending order. For an
/// internal node, `entries` are separators and `children.len() ==
/// entries.len() + 1`; everything under `children[i]` is less than
/// `entries[i]` and everything under `children[i + 1]` is greater or equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<K, V> {
    pub is_leaf: bool,
    /// Right sibling, leaves only.
    pub next: Option<SlotId>,
    pub entries: Vec<Pair<K, V>>,
    pub children: Vec<SlotId>,
}

impl<K, V> Node<K, V>
where
    K: FixedCodec + Ord + Copy,
    V: FixedCodec + Ord + Copy,
{
    /// Encoded width of one entry.
    pub const ENTRY_WIDTH: usize = K::WIDTH + V::WIDTH;

    #[must_use]
    pub const fn new_leaf(entries: Vec<Pair<K, V>>) -> Self {
        Self {
            is_leaf: true,
            next: None,
            entries,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub const fn new_internal(entries: Vec<Pair<K, V>>, children: Vec<SlotId>) -> Self {
        Self {
            is_leaf: false,
            next: None,
            entries,
            children,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Child that owns `entry`. An exact separator match goes right.
    #[must_use]
    pub fn child_for_entry(&self, entry: &Pair<K, V>) -> usize {
        self.entries.partition_point(|sep| sep <= entry)
    }

    /// Leftmost child that can hold an entry with `key`.
    #[must_use]
    pub fn child_for_key(&self, key: &K) -> usize {
        self.entries.partition_point(|sep| sep.first < *key)
    }

    /// Split an overfull node in two.
    ///
    /// Returns the separator to push into the parent and the new right node.
    /// A leaf keeps the lower half and the separator is a copy of the right
    /// node's first entry. An internal node promotes its middle separator,
    /// which ends up in neither half. Sibling links are the caller's job.
    pub fn split(&mut self) -> (Pair<K, V>, Self) {
        let mid = self.entries.len() / 2;

        if self.is_leaf {
            let right_entries = self.entries.split_off(mid);
            let separator = right_entries[0];
            (separator, Self::new_leaf(right_entries))
        } else {
            let right_entries = self.entries.split_off(mid + 1);
            let right_children = self.children.split_off(mid + 1);
            let separator = self.entries[mid];
            self.entries.truncate(mid);
            (separator, Self::new_internal(right_entries, right_children))
        }
    }

    /// Append `right` onto `self`, consuming it.
    ///
    /// Leaves concatenate entries and inherit the right sibling link; internal
    /// nodes pull the parent `separator` down between the two halves.
    pub fn absorb(&mut self, right: Self, separator: Pair<K, V>) {
        if self.is_leaf {
            self.entries.extend(right.entries);
            self.next = right.next;
        } else {
            self.entries.push(separator);
            self.entries.extend(right.entries);
            self.children.extend(right.children);
        }
    }

    /// Serialize into `buf`.
    ///
    /// Writes the child array only when `buf` spans a whole slot, so a
    /// header-sized buffer produces a header-only image.
    pub fn encode(&self, buf: &mut [u8], layout: SlotLayout) {
        write_i32(buf, 0, i32::from(self.is_leaf));
        write_i32(buf, 4, i32::try_from(self.entries.len()).unwrap_or(i32::MAX));
        write_i32(buf, 8, SlotId::to_raw(self.next));

        let mut offset = SlotLayout::ENTRIES_OFFSET;
        for entry in &self.entries {
            entry.encode(&mut buf[offset..]);
            offset += layout.entry_width;
        }

        if buf.len() >= layout.slot_width() {
            let mut offset = layout.header_width();
            for child in &self.children {
                write_i32(buf, offset, SlotId::to_raw(Some(*child)));
                offset += 4;
            }
        }
    }

    /// Deserialize from `buf`, reading the child array only if `with_children`.
    pub fn decode(buf: &[u8], layout: SlotLayout, with_children: bool) -> Result<Self, CodecError> {
        let is_leaf = match read_i32(buf, 0) {
            0 => false,
            1 => true,
            other => return Err(CodecError::InvalidFlag(other)),
        };
        let count = decode_count(buf, 4, "entry", layout.order)?;
        let next = SlotId::from_raw(read_i32(buf, 8)).map_err(CodecError::InvalidSlot)?;

        let mut entries = Vec::with_capacity(count + 1);
        let mut offset = SlotLayout::ENTRIES_OFFSET;
        for _ in 0..count {
            entries.push(Pair::decode(&buf[offset..])?);
            offset += layout.entry_width;
        }

        let mut children = Vec::new();
        if with_children && !is_leaf {
            children.reserve(count + 2);
            let mut offset = layout.header_width();
            for _ in 0..=count {
                let child = SlotId::from_raw(read_i32(buf, offset))
                    .map_err(CodecError::InvalidSlot)?
                    .ok_or(CodecError::InvalidSlot(read_i32(buf, offset)))?;
                children.push(child);
                offset += 4;
            }
        }

        Ok(Self {
            is_leaf,
            next,
            entries,
            children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestNode = Node<i32, i32>;

    fn entries(pairs: &[(i32, i32)]) -> Vec<Pair<i32, i32>> {
        pairs.iter().map(|&(k, v)| Pair::new(k, v)).collect()
    }

    #[test]
    fn test_layout_widths() {
        let layout = SlotLayout::new(6, TestNode::ENTRY_WIDTH);
        assert_eq!(layout.header_width(), 12 + 6 * 8);
        assert_eq!(layout.slot_width(), 12 + 6 * 8 + 7 * 4);
    }

    #[test]
    fn test_leaf_node_roundtrip() {
        let layout = SlotLayout::new(4, TestNode::ENTRY_WIDTH);
        let mut leaf = TestNode::new_leaf(entries(&[(1, 10), (2, 20), (2, 21)]));
        leaf.next = Some(SlotId(9));

        let mut buf = vec![0u8; layout.slot_width()];
        leaf.encode(&mut buf, layout);

        let restored = TestNode::decode(&buf, layout, true).expect("decode");
        assert_eq!(restored, leaf);
    }

    #[test]
    fn test_internal_node_roundtrip() {
        let layout = SlotLayout::new(4, TestNode::ENTRY_WIDTH);
        let node = TestNode::new_internal(
            entries(&[(5, 0), (9, 0)]),
            vec![SlotId(1), SlotId(2), SlotId(3)],
        );

        let mut buf = vec![0u8; layout.slot_width()];
        node.encode(&mut buf, layout);

        let restored = TestNode::decode(&buf, layout, true).expect("decode");
        assert_eq!(restored, node);

        let header_only = TestNode::decode(&buf, layout, false).expect("decode");
        assert_eq!(header_only.entries, node.entries);
        assert!(header_only.children.is_empty());
    }

    #[test]
    fn test_header_image_leaves_children_untouched() {
        let layout = SlotLayout::new(3, TestNode::ENTRY_WIDTH);
        let node = TestNode::new_internal(entries(&[(5, 0)]), vec![SlotId(7), SlotId(8)]);

        let mut buf = vec![0u8; layout.slot_width()];
        node.encode(&mut buf, layout);

        let mut changed = node.clone();
        changed.entries[0] = Pair::new(6, 0);
        changed.encode(&mut buf[..layout.header_width()], layout);

        let restored = TestNode::decode(&buf, layout, true).expect("decode");
        assert_eq!(restored.entries, entries(&[(6, 0)]));
        assert_eq!(restored.children, vec![SlotId(7), SlotId(8)]);
    }

    #[test]
    fn test_decode_rejects_overfull_count() {
        let layout = SlotLayout::new(3, TestNode::ENTRY_WIDTH);
        let mut buf = vec![0u8; layout.slot_width()];
        write_i32(&mut buf, 0, 1);
        write_i32(&mut buf, 4, 4);
        write_i32(&mut buf, 8, -1);

        let result = TestNode::decode(&buf, layout, true);
        assert!(matches!(result, Err(CodecError::InvalidLength { value: 4, .. })));
    }

    #[test]
    fn test_child_selection() {
        let node = TestNode::new_internal(
            entries(&[(5, 1), (9, 0)]),
            vec![SlotId(1), SlotId(2), SlotId(3)],
        );

        assert_eq!(node.child_for_entry(&Pair::new(5, 0)), 0);
        assert_eq!(node.child_for_entry(&Pair::new(5, 1)), 1);
        assert_eq!(node.child_for_entry(&Pair::new(9, 0)), 2);

        // (5, 0) may sit left of the (5, 1) separator, so a key lookup
        // starts there.
        assert_eq!(node.child_for_key(&5), 0);
        assert_eq!(node.child_for_key(&6), 1);
        assert_eq!(node.child_for_key(&10), 2);
    }

    #[test]
    fn test_leaf_node_split() {
        // Order 4 overflowed to 5 entries.
        let mut leaf = TestNode::new_leaf(entries(&[(1, 0), (2, 0), (3, 0), (4, 0), (5, 0)]));
        let (separator, right) = leaf.split();

        assert_eq!(leaf.entries, entries(&[(1, 0), (2, 0)]));
        assert_eq!(right.entries, entries(&[(3, 0), (4, 0), (5, 0)]));
        assert_eq!(separator, Pair::new(3, 0));
        assert!(right.is_leaf);
    }

    #[test]
    fn test_internal_node_split() {
        // Order 3 overflowed to 4 separators.
        let mut node = TestNode::new_internal(
            entries(&[(10, 0), (20, 0), (30, 0), (40, 0)]),
            (0..5).map(SlotId).collect(),
        );
        let (separator, right) = node.split();

        assert_eq!(separator, Pair::new(30, 0));
        assert_eq!(node.entries, entries(&[(10, 0), (20, 0)]));
        assert_eq!(node.children, vec![SlotId(0), SlotId(1), SlotId(2)]);
        assert_eq!(right.entries, entries(&[(40, 0)]));
        assert_eq!(right.children, vec![SlotId(3), SlotId(4)]);
    }

    #[test]
    fn test_absorb() {
        let mut left = TestNode::new_leaf(entries(&[(1, 0)]));
        let mut right = TestNode::new_leaf(entries(&[(2, 0), (3, 0)]));
        right.next = Some(SlotId(4));
        left.absorb(right, Pair::new(2, 0));
        assert_eq!(left.entries, entries(&[(1, 0), (2, 0), (3, 0)]));
        assert_eq!(left.next, Some(SlotId(4)));

        let mut left = TestNode::new_internal(entries(&[(1, 0)]), vec![SlotId(0), SlotId(1)]);
        let right = TestNode::new_internal(entries(&[(3, 0)]), vec![SlotId(2), SlotId(3)]);
        left.absorb(right, Pair::new(2, 0));
        assert_eq!(left.entries, entries(&[(1, 0), (2, 0), (3, 0)]));
        assert_eq!(left.children.len(), 4);
    }
}
