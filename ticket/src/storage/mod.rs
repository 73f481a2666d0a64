//! On-disk storage for the ticket engine.
//!
//! Two kinds of files live in the data directory:
//!
//! - Tree files (`*Index.dat`): a [`btree::BPlusTree`] mapping domain keys to
//!   record positions.
//! - Record files (`*Data.dat`): a [`RecordFile`] of fixed-width records
//!   addressed by position.
//!
//! Both are single-writer and keep no cache beyond the buffers of the call in
//! progress.

pub mod btree;
pub mod codec;
mod records;

pub use codec::{CodecError, FixedCodec};
pub use records::{RecordError, RecordFile};
