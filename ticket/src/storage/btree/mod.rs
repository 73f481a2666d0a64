//! Disk-backed B+ tree multimap.
//!
//! Each tree lives in its own file: a fixed header page followed by an array
//! of equally sized node slots. Entries are `(key, value)` pairs, so a key may
//! carry many values.
//!
//! # Usage
//!
//! ```
//! use ticket::storage::btree::BPlusTree;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut tree: BPlusTree<i32, i32> = BPlusTree::open(&dir.path().join("demo.idx")).unwrap();
//!
//! tree.insert(5, 2).unwrap();
//! tree.insert(5, 1).unwrap();
//! assert!(!tree.insert(5, 1).unwrap());
//!
//! assert_eq!(tree.find(&5).unwrap(), vec![1, 2]);
//! ```

mod header;
mod node;
mod slot;
mod store;
mod tree;

pub use header::{FORMAT_VERSION, FREE_STACK_CAPACITY, HEADER_SIZE, HeaderError, MAGIC};
pub use slot::SlotId;
pub use store::SlotError;
pub use tree::{BPlusTree, BTreeError, MIN_ORDER, TreeStats, default_order};
