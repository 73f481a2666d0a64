//! Disk-backed B+ tree with duplicate keys.
//!
//! Entries are `(key, value)` pairs ordered lexicographically, so one key can
//! map to many values while an exact `(key, value)` pair is stored at most
//! once. All data lives in leaves; internal nodes hold separator pairs.
//!
//! Nodes hold at most `order` entries and, except for the root, at least
//! `order / 3`. Inserts split full nodes bottom-up and may grow a new root;
//! removals borrow from or merge with a sibling bottom-up and may collapse the
//! root.

use std::path::Path;

use crate::storage::btree::node::Node;
use crate::storage::btree::slot::SlotId;
use crate::storage::btree::store::{NodeStore, SlotError};
use crate::storage::codec::FixedCodec;
use crate::types::Pair;

/// Smallest order with a non-zero minimum fanout.
pub const MIN_ORDER: usize = 3;

/// Slot size that [`default_order`] aims for.
const TARGET_SLOT_BYTES: usize = 8192;

/// Largest multiple of three whose slot fits in about 8 KiB.
#[must_use]
pub const fn default_order(entry_width: usize) -> usize {
    // 12 header bytes plus one spare child pointer.
    let order = (TARGET_SLOT_BYTES - 16) / (entry_width + 4);
    let order = order - order % 3;
    if order < MIN_ORDER { MIN_ORDER } else { order }
}

/// Outcome of inserting into a subtree.
enum InsertOutcome<K, V> {
    /// The exact pair was already present.
    Duplicate,
    Inserted,
    /// The subtree root split; the parent must adopt `right`.
    Split { separator: Pair<K, V>, right: SlotId },
}

/// Outcome of removing from a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoveOutcome {
    Absent,
    Removed,
    /// The subtree root dropped below the minimum fanout.
    Underflow,
}

/// Shape of a tree as reported by [`BPlusTree::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    /// Levels from the root to the leaves; 0 for an empty tree.
    pub height: usize,
    pub leaves: usize,
    pub internal_nodes: usize,
    pub entries: usize,
    /// Slots ever handed out.
    pub high_water: u32,
    /// Slots waiting on the free stack.
    pub free_slots: usize,
}

/// A B+ tree stored in its own file.
pub struct BPlusTree<K, V> {
    store: NodeStore<K, V>,
    min_fanout: usize,
}

impl<K, V> BPlusTree<K, V>
where
    K: FixedCodec + Ord + Copy + std::fmt::Debug,
    V: FixedCodec + Ord + Copy + std::fmt::Debug,
{
    /// Open a tree with the default order for its entry width.
    pub fn open(path: &Path) -> Result<Self, BTreeError> {
        Self::open_with_order(path, default_order(Node::<K, V>::ENTRY_WIDTH))
    }

    /// Open a tree with an explicit node capacity.
    pub fn open_with_order(path: &Path, order: usize) -> Result<Self, BTreeError> {
        if order < MIN_ORDER {
            return Err(BTreeError::InvalidOrder(order));
        }
        let store = NodeStore::open(path, order)?;
        tracing::debug!(path = %path.display(), order, root = ?store.root(), "opened tree");
        Ok(Self {
            store,
            min_fanout: order / 3,
        })
    }

    /// Node capacity M.
    #[must_use]
    pub const fn order(&self) -> usize {
        self.store.layout().order
    }

    /// Minimum entries in a non-root node.
    #[must_use]
    pub const fn min_fanout(&self) -> usize {
        self.min_fanout
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.store.root().is_none()
    }

    /// All values stored under `key`, in ascending order.
    pub fn find(&mut self, key: &K) -> Result<Vec<V>, BTreeError> {
        let mut values = Vec::new();
        let Some(mut slot) = self.store.root() else {
            return Ok(values);
        };

        let mut node = self.store.read_full(slot)?;
        while !node.is_leaf {
            slot = node.children[node.child_for_key(key)];
            node = self.store.read_full(slot)?;
        }

        let mut start = node.entries.partition_point(|e| e.first < *key);
        loop {
            for entry in &node.entries[start..] {
                if entry.first != *key {
                    return Ok(values);
                }
                values.push(entry.second);
            }
            match node.next {
                Some(next) => {
                    node = self.store.read_header(next)?;
                    start = 0;
                }
                None => return Ok(values),
            }
        }
    }

    /// Insert `(key, value)`.
    ///
    /// Returns `false` if the exact pair was already present.
    pub fn insert(&mut self, key: K, value: V) -> Result<bool, BTreeError> {
        let entry = Pair::new(key, value);

        let Some(root) = self.store.root() else {
            let slot = self.store.allocate()?;
            self.store.write_full(slot, &Node::new_leaf(vec![entry]))?;
            self.store.set_root(Some(slot));
            return Ok(true);
        };

        match self.insert_into(root, entry)? {
            InsertOutcome::Duplicate => Ok(false),
            InsertOutcome::Inserted => Ok(true),
            InsertOutcome::Split { separator, right } => {
                let new_root = self.store.allocate()?;
                let node = Node::new_internal(vec![separator], vec![root, right]);
                self.store.write_full(new_root, &node)?;
                self.store.set_root(Some(new_root));
                tracing::debug!(
                    path = %self.store.path().display(),
                    old_root = %root,
                    %new_root,
                    "root split"
                );
                Ok(true)
            }
        }
    }

    /// Remove `(key, value)`.
    ///
    /// Returns `false` if the pair was not present.
    pub fn remove(&mut self, key: &K, value: &V) -> Result<bool, BTreeError> {
        let Some(root) = self.store.root() else {
            return Ok(false);
        };
        let entry = Pair::new(*key, *value);
        let outcome = self.remove_from(root, &entry, true)?;
        Ok(outcome != RemoveOutcome::Absent)
    }

    /// Remove everything and truncate the file.
    pub fn clear(&mut self) -> Result<(), BTreeError> {
        self.store.clear()?;
        tracing::debug!(path = %self.store.path().display(), "cleared tree");
        Ok(())
    }

    /// Persist tree metadata.
    pub fn flush(&mut self) -> Result<(), BTreeError> {
        Ok(self.store.flush()?)
    }

    fn insert_into(&mut self, slot: SlotId, entry: Pair<K, V>) -> Result<InsertOutcome<K, V>, BTreeError> {
        let mut node = self.store.read_full(slot)?;

        if node.is_leaf {
            let Err(pos) = node.entries.binary_search(&entry) else {
                return Ok(InsertOutcome::Duplicate);
            };
            node.entries.insert(pos, entry);
            if node.len() <= self.order() {
                self.store.write_header(slot, &node)?;
                return Ok(InsertOutcome::Inserted);
            }
            return self.split(slot, node);
        }

        let index = node.child_for_entry(&entry);
        match self.insert_into(node.children[index], entry)? {
            InsertOutcome::Split { separator, right } => {
                node.entries.insert(index, separator);
                node.children.insert(index + 1, right);
                if node.len() <= self.order() {
                    self.store.write_full(slot, &node)?;
                    return Ok(InsertOutcome::Inserted);
                }
                self.split(slot, node)
            }
            other => Ok(other),
        }
    }

    fn split(&mut self, slot: SlotId, mut node: Node<K, V>) -> Result<InsertOutcome<K, V>, BTreeError> {
        let right_slot = self.store.allocate()?;
        let (separator, mut right) = node.split();
        if node.is_leaf {
            right.next = node.next;
            node.next = Some(right_slot);
        }

        self.store.write_full(slot, &node)?;
        self.store.write_full(right_slot, &right)?;
        tracing::trace!(%slot, %right_slot, leaf = node.is_leaf, "split node");

        Ok(InsertOutcome::Split {
            separator,
            right: right_slot,
        })
    }

    fn remove_from(&mut self, slot: SlotId, entry: &Pair<K, V>, is_root: bool) -> Result<RemoveOutcome, BTreeError> {
        let mut node = self.store.read_full(slot)?;

        if node.is_leaf {
            let Ok(pos) = node.entries.binary_search(entry) else {
                return Ok(RemoveOutcome::Absent);
            };
            node.entries.remove(pos);
            if pos == node.len() {
                // Dropping the last entry leaves the others in place.
                self.store.write_count(slot, node.len())?;
            } else {
                self.store.write_header(slot, &node)?;
            }
            return Ok(self.underflow_state(&node, is_root));
        }

        let index = node.child_for_entry(entry);
        match self.remove_from(node.children[index], entry, false)? {
            RemoveOutcome::Underflow => self.rebalance(slot, node, index, is_root),
            other => Ok(other),
        }
    }

    fn underflow_state(&self, node: &Node<K, V>, is_root: bool) -> RemoveOutcome {
        if !is_root && node.len() < self.min_fanout {
            RemoveOutcome::Underflow
        } else {
            RemoveOutcome::Removed
        }
    }

    /// Repair `parent.children[index]` after it dropped below the minimum.
    ///
    /// In order of preference: collapse a two-child root, borrow from the
    /// left sibling, borrow from the right sibling, merge into the left
    /// sibling, absorb the right sibling.
    fn rebalance(
        &mut self,
        slot: SlotId,
        mut parent: Node<K, V>,
        index: usize,
        is_root: bool,
    ) -> Result<RemoveOutcome, BTreeError> {
        let child_slot = parent.children[index];
        let mut child = self.store.read_full(child_slot)?;

        if is_root && parent.len() == 1 && self.try_collapse_root(slot, &parent, index, &child)? {
            return Ok(RemoveOutcome::Removed);
        }

        let left_slot = index.checked_sub(1).map(|i| parent.children[i]);
        let right_slot = parent.children.get(index + 1).copied();

        if let Some(left_slot) = left_slot
            && self.store.read_count(left_slot)? > self.min_fanout
        {
            let mut left = self.store.read_full(left_slot)?;
            Self::rotate_from_left(&mut parent, index, &mut left, &mut child);
            self.persist(left_slot, &left)?;
            self.persist(child_slot, &child)?;
            self.store.write_header(slot, &parent)?;
            tracing::trace!(%child_slot, %left_slot, "borrowed from left sibling");
            return Ok(RemoveOutcome::Removed);
        }

        if let Some(right_slot) = right_slot
            && self.store.read_count(right_slot)? > self.min_fanout
        {
            let mut right = self.store.read_full(right_slot)?;
            Self::rotate_from_right(&mut parent, index, &mut right, &mut child);
            self.persist(right_slot, &right)?;
            self.persist(child_slot, &child)?;
            self.store.write_header(slot, &parent)?;
            tracing::trace!(%child_slot, %right_slot, "borrowed from right sibling");
            return Ok(RemoveOutcome::Removed);
        }

        if let Some(left_slot) = left_slot {
            let mut left = self.store.read_full(left_slot)?;
            let separator = parent.entries.remove(index - 1);
            parent.children.remove(index);
            left.absorb(child, separator);
            self.persist(left_slot, &left)?;
            self.store.recycle(child_slot);
            tracing::trace!(%child_slot, %left_slot, "merged into left sibling");
        } else if let Some(right_slot) = right_slot {
            let right = self.store.read_full(right_slot)?;
            let separator = parent.entries.remove(index);
            parent.children.remove(index + 1);
            child.absorb(right, separator);
            self.persist(child_slot, &child)?;
            self.store.recycle(right_slot);
            tracing::trace!(%child_slot, %right_slot, "absorbed right sibling");
        } else {
            return Err(BTreeError::Invariant(format!(
                "child {child_slot} of {slot} has no siblings"
            )));
        }

        self.store.write_full(slot, &parent)?;
        Ok(self.underflow_state(&parent, is_root))
    }

    /// Replace a one-separator root by the union of its two children if they
    /// fit in one node. Returns whether the collapse happened.
    fn try_collapse_root(
        &mut self,
        root: SlotId,
        parent: &Node<K, V>,
        index: usize,
        child: &Node<K, V>,
    ) -> Result<bool, BTreeError> {
        let sibling_slot = parent.children[1 - index];
        let sibling_count = self.store.read_count(sibling_slot)?;
        let merged = if child.is_leaf {
            child.len() + sibling_count
        } else {
            child.len() + sibling_count + 1
        };
        if merged > self.order() {
            return Ok(false);
        }

        let sibling = self.store.read_full(sibling_slot)?;
        let (mut left, right, left_slot, right_slot) = if index == 0 {
            (child.clone(), sibling, parent.children[0], sibling_slot)
        } else {
            (sibling, child.clone(), sibling_slot, parent.children[1])
        };
        left.absorb(right, parent.entries[0]);
        self.persist(left_slot, &left)?;
        self.store.recycle(right_slot);
        self.store.recycle(root);
        self.store.set_root(Some(left_slot));
        tracing::debug!(
            path = %self.store.path().display(),
            old_root = %root,
            new_root = %left_slot,
            "root collapsed"
        );
        Ok(true)
    }

    fn rotate_from_left(parent: &mut Node<K, V>, index: usize, left: &mut Node<K, V>, child: &mut Node<K, V>) {
        if child.is_leaf {
            if let Some(moved) = left.entries.pop() {
                child.entries.insert(0, moved);
                parent.entries[index - 1] = moved;
            }
        } else if let (Some(entry), Some(grandchild)) = (left.entries.pop(), left.children.pop()) {
            let separator = std::mem::replace(&mut parent.entries[index - 1], entry);
            child.entries.insert(0, separator);
            child.children.insert(0, grandchild);
        }
    }

    fn rotate_from_right(parent: &mut Node<K, V>, index: usize, right: &mut Node<K, V>, child: &mut Node<K, V>) {
        if right.entries.is_empty() {
            return;
        }
        let entry = right.entries.remove(0);
        if child.is_leaf {
            child.entries.push(entry);
            if let Some(first) = right.entries.first() {
                parent.entries[index] = *first;
            }
        } else {
            let grandchild = right.children.remove(0);
            let separator = std::mem::replace(&mut parent.entries[index], entry);
            child.entries.push(separator);
            child.children.push(grandchild);
        }
    }

    /// Leaves carry no child array, so their header is the whole node.
    fn persist(&mut self, slot: SlotId, node: &Node<K, V>) -> Result<(), BTreeError> {
        if node.is_leaf {
            self.store.write_header(slot, node)?;
        } else {
            self.store.write_full(slot, node)?;
        }
        Ok(())
    }

    /// Walk the whole tree and verify its structural invariants.
    ///
    /// Checks ordering, separator bounds, occupancy, uniform leaf depth and
    /// the leaf sibling chain.
    pub fn check(&mut self) -> Result<TreeStats, BTreeError> {
        let mut stats = TreeStats {
            high_water: self.store.high_water(),
            free_slots: self.store.free_len(),
            ..TreeStats::default()
        };
        let Some(root) = self.store.root() else {
            return Ok(stats);
        };

        let mut leaves = Vec::new();
        stats.height = self.check_node(root, None, None, true, &mut leaves, &mut stats)?;

        for (i, (slot, next)) in leaves.iter().enumerate() {
            let expected = leaves.get(i + 1).map(|(s, _)| *s);
            if *next != expected {
                return Err(BTreeError::Invariant(format!(
                    "leaf {slot} links to {next:?}, expected {expected:?}"
                )));
            }
        }
        Ok(stats)
    }

    fn check_node(
        &mut self,
        slot: SlotId,
        lower: Option<Pair<K, V>>,
        upper: Option<Pair<K, V>>,
        is_root: bool,
        leaves: &mut Vec<(SlotId, Option<SlotId>)>,
        stats: &mut TreeStats,
    ) -> Result<usize, BTreeError> {
        let node = self.store.read_full(slot)?;
        let fail = |what: String| Err(BTreeError::Invariant(format!("node {slot}: {what}")));

        if node.len() > self.order() {
            return fail(format!("{} entries exceeds order {}", node.len(), self.order()));
        }
        if !is_root && node.len() < self.min_fanout {
            return fail(format!("{} entries below minimum {}", node.len(), self.min_fanout));
        }
        if node.entries.windows(2).any(|w| w[0] >= w[1]) {
            return fail("entries out of order".to_string());
        }
        if let (Some(lower), Some(first)) = (lower, node.entries.first())
            && *first < lower
        {
            return fail(format!("{first:?} below bound {lower:?}"));
        }
        if let (Some(upper), Some(last)) = (upper, node.entries.last())
            && *last >= upper
        {
            return fail(format!("{last:?} not below bound {upper:?}"));
        }

        if node.is_leaf {
            stats.leaves += 1;
            stats.entries += node.len();
            leaves.push((slot, node.next));
            return Ok(1);
        }

        stats.internal_nodes += 1;
        if node.children.len() != node.len() + 1 {
            return fail(format!("{} children for {} separators", node.children.len(), node.len()));
        }
        if node.is_empty() {
            return fail("internal node without separators".to_string());
        }

        let mut depth = None;
        for (i, child) in node.children.iter().enumerate() {
            let child_lower = if i == 0 { lower } else { Some(node.entries[i - 1]) };
            let child_upper = node.entries.get(i).copied().or(upper);
            let child_depth = self.check_node(*child, child_lower, child_upper, false, leaves, stats)?;
            match depth {
                None => depth = Some(child_depth),
                Some(d) if d != child_depth => {
                    return fail(format!("children at depths {d} and {child_depth}"));
                }
                Some(_) => {}
            }
        }
        Ok(depth.unwrap_or(0) + 1)
    }
}

/// Errors that can occur during B+ tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// Slot I/O error.
    Slot(SlotError),
    /// Order below [`MIN_ORDER`].
    InvalidOrder(usize),
    /// The on-disk structure violates a tree invariant.
    Invariant(String),
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Slot(e) => write!(f, "slot error: {e}"),
            Self::InvalidOrder(order) => {
                write!(f, "invalid order {order}: must be at least {MIN_ORDER}")
            }
            Self::Invariant(msg) => write!(f, "tree invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Slot(e) => Some(e),
            Self::InvalidOrder(_) | Self::Invariant(_) => None,
        }
    }
}

impl From<SlotError> for BTreeError {
    fn from(e: SlotError) -> Self {
        Self::Slot(e)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    type TestTree = BPlusTree<i32, i32>;

    fn create_test_tree(order: usize) -> (tempfile::TempDir, TestTree) {
        let dir = tempdir().expect("create temp dir");
        let tree = TestTree::open_with_order(&dir.path().join("test.idx"), order).expect("open tree");
        (dir, tree)
    }

    #[test]
    fn test_default_order() {
        // (i32, i32) entries: (8192 - 16) / 12 = 681, rounded down to 681.
        assert_eq!(default_order(8), 681);
        // 24-byte id + i32: (8192 - 16) / 32 = 255.
        assert_eq!(default_order(28), 255);
        assert_eq!(default_order(100_000), MIN_ORDER);
        assert_eq!(default_order(56) % 3, 0);
    }

    #[test]
    fn test_rejects_tiny_order() {
        let dir = tempdir().expect("create temp dir");
        let result = TestTree::open_with_order(&dir.path().join("test.idx"), 2);
        assert!(matches!(result, Err(BTreeError::InvalidOrder(2))));
    }

    #[test]
    fn test_empty_tree() {
        let (_dir, mut tree) = create_test_tree(3);
        assert!(tree.is_empty());
        assert!(tree.find(&1).expect("find").is_empty());
        assert!(!tree.remove(&1, &1).expect("remove"));
        assert_eq!(tree.check().expect("check").height, 0);
    }

    #[test]
    fn test_multimap_scenario() {
        let (_dir, mut tree) = create_test_tree(3);

        assert!(tree.insert(5, 1).expect("insert"));
        assert!(tree.insert(5, 2).expect("insert"));
        assert!(tree.insert(3, 1).expect("insert"));
        assert!(!tree.insert(5, 1).expect("duplicate insert"));
        assert!(tree.insert(3, 2).expect("insert"));

        assert_eq!(tree.find(&5).expect("find"), vec![1, 2]);
        assert_eq!(tree.find(&3).expect("find"), vec![1, 2]);

        assert!(tree.remove(&5, &1).expect("remove"));
        assert_eq!(tree.find(&5).expect("find"), vec![2]);

        assert!(tree.remove(&5, &2).expect("remove"));
        assert!(tree.find(&5).expect("find").is_empty());
        assert_eq!(tree.find(&3).expect("find"), vec![1, 2]);

        tree.check().expect("valid tree");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (_dir, mut tree) = create_test_tree(3);
        tree.insert(1, 1).expect("insert");
        tree.insert(2, 2).expect("insert");

        assert!(tree.remove(&1, &1).expect("remove"));
        assert!(!tree.remove(&1, &1).expect("second remove"));
        assert!(!tree.remove(&2, &3).expect("wrong value"));
        assert_eq!(tree.find(&2).expect("find"), vec![2]);
    }

    #[test]
    fn test_values_come_back_sorted() {
        let (_dir, mut tree) = create_test_tree(3);
        for value in [9, 4, 7, 1, 8, 2, 6, 3, 5] {
            tree.insert(42, value).expect("insert");
        }
        tree.insert(41, 0).expect("insert");
        tree.insert(43, 0).expect("insert");

        assert_eq!(tree.find(&42).expect("find"), (1..=9).collect::<Vec<_>>());
        tree.check().expect("valid tree");
    }

    #[test]
    fn test_duplicate_key_run_spans_leaves() {
        let (_dir, mut tree) = create_test_tree(4);
        for value in 0..40 {
            tree.insert(7, value).expect("insert");
        }
        for key in 0..7 {
            tree.insert(key, 0).expect("insert");
        }

        let stats = tree.check().expect("valid tree");
        assert!(stats.leaves > 5);
        assert_eq!(tree.find(&7).expect("find"), (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_first_split() {
        let (_dir, mut tree) = create_test_tree(6);

        for key in 0..6 {
            tree.insert(key, 0).expect("insert");
        }
        let stats = tree.check().expect("valid tree");
        assert_eq!((stats.height, stats.leaves), (1, 1));

        tree.insert(6, 0).expect("insert");
        let stats = tree.check().expect("valid tree");
        assert_eq!(stats.height, 2);
        assert_eq!(stats.leaves, 2);
        assert_eq!(stats.internal_nodes, 1);
        assert_eq!(stats.entries, 7);
    }

    #[test]
    fn test_shrinks_back_to_single_leaf() {
        let (_dir, mut tree) = create_test_tree(6);
        let min = tree.min_fanout();

        for key in 0..=6 {
            tree.insert(key, 0).expect("insert");
        }
        assert_eq!(tree.check().expect("valid tree").height, 2);

        let mut key = 6;
        while tree.check().expect("valid tree").entries >= 2 * min {
            assert!(tree.remove(&key, &0).expect("remove"));
            key -= 1;
        }

        let stats = tree.check().expect("valid tree");
        assert_eq!(stats.height, 1);
        assert_eq!(stats.leaves, 1);
        assert_eq!(stats.internal_nodes, 0);
    }

    #[test]
    fn test_sibling_chain_after_growth() {
        let (_dir, mut tree) = create_test_tree(3);
        for key in (0..200).rev() {
            tree.insert(key, key).expect("insert");
        }
        let stats = tree.check().expect("valid tree");
        assert!(stats.height >= 4);
        assert_eq!(stats.entries, 200);
    }

    #[test]
    fn test_removing_everything_recycles_slots() {
        let (_dir, mut tree) = create_test_tree(3);
        for key in 0..100 {
            tree.insert(key, 0).expect("insert");
        }
        let grown = tree.check().expect("valid tree");

        for key in 0..100 {
            assert!(tree.remove(&key, &0).expect("remove"));
        }
        let emptied = tree.check().expect("valid tree");
        assert_eq!(emptied.entries, 0);
        assert_eq!(emptied.height, 1);
        assert_eq!(emptied.free_slots + 1, grown.high_water as usize);

        // New nodes come from the free stack, not the end of the file.
        for key in 0..100 {
            tree.insert(key, 0).expect("insert");
        }
        assert_eq!(tree.check().expect("valid tree").high_water, grown.high_water);
    }

    #[test]
    fn test_clear() {
        let (_dir, mut tree) = create_test_tree(3);
        for key in 0..50 {
            tree.insert(key, 0).expect("insert");
        }
        tree.clear().expect("clear");

        assert!(tree.is_empty());
        assert!(tree.find(&10).expect("find").is_empty());
        assert_eq!(tree.check().expect("check"), TreeStats::default());

        tree.insert(10, 1).expect("insert after clear");
        assert_eq!(tree.find(&10).expect("find"), vec![1]);
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.idx");

        {
            let mut tree = TestTree::open_with_order(&path, 4).expect("open");
            for key in 0..300 {
                tree.insert(key % 17, key).expect("insert");
            }
            for key in (0..300).step_by(3) {
                tree.remove(&(key % 17), &key).expect("remove");
            }
        }

        let mut tree = TestTree::open_with_order(&path, 4).expect("reopen");
        tree.check().expect("valid tree");
        let expected: Vec<i32> = (0..300).filter(|k| k % 17 == 5 && k % 3 != 0).collect();
        assert_eq!(tree.find(&5).expect("find"), expected);
    }

    #[test]
    fn test_composite_keys() {
        let dir = tempdir().expect("create temp dir");
        let mut tree: BPlusTree<Pair<u32, u32>, u32> =
            BPlusTree::open_with_order(&dir.path().join("queue.idx"), 3).expect("open");

        for order in 0..10 {
            tree.insert(Pair::new(order % 2, 7), order).expect("insert");
        }
        assert_eq!(tree.find(&Pair::new(1, 7)).expect("find"), vec![1, 3, 5, 7, 9]);
        assert!(tree.find(&Pair::new(1, 8)).expect("find").is_empty());
    }

    fn run_random_workload(order: usize, seed: u64) {
        let (_dir, mut tree) = create_test_tree(order);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut model: BTreeSet<(i32, i32)> = BTreeSet::new();

        for step in 0..3000 {
            let key = rng.random_range(0..60);
            let value = rng.random_range(0..8);
            if rng.random_bool(0.6) {
                let inserted = tree.insert(key, value).expect("insert");
                assert_eq!(inserted, model.insert((key, value)), "insert step {step}");
            } else {
                let removed = tree.remove(&key, &value).expect("remove");
                assert_eq!(removed, model.remove(&(key, value)), "remove step {step}");
            }

            if step % 100 == 0 {
                let stats = tree.check().expect("valid tree");
                assert_eq!(stats.entries, model.len());
            }
        }

        for key in 0..60 {
            let expected: Vec<i32> = model.range((key, i32::MIN)..=(key, i32::MAX)).map(|&(_, v)| v).collect();
            assert_eq!(tree.find(&key).expect("find"), expected, "key {key}");
        }

        // Drain in random order down to an empty root leaf.
        let mut remaining: Vec<(i32, i32)> = model.into_iter().collect();
        remaining.shuffle(&mut rng);
        for (i, (key, value)) in remaining.iter().enumerate() {
            assert!(tree.remove(key, value).expect("remove"));
            if i % 50 == 0 {
                tree.check().expect("valid tree");
            }
        }
        let stats = tree.check().expect("valid tree");
        assert_eq!((stats.entries, stats.height), (0, 1));
    }

    #[test]
    fn test_random_workload_order_3() {
        run_random_workload(3, 1);
    }

    #[test]
    fn test_random_workload_order_4() {
        run_random_workload(4, 2);
    }

    #[test]
    fn test_random_workload_order_7() {
        run_random_workload(7, 3);
    }

    #[test]
    fn test_random_workload_order_12() {
        run_random_workload(12, 4);
    }
}
