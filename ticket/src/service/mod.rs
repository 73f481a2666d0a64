//! Domain services built on the storage layer.
//!
//! Each service owns its tree and record files in the data directory:
//!
//! | service   | trees                                  | records                     |
//! |-----------|----------------------------------------|-----------------------------|
//! | users     | `UserIndex.dat`                        | `UserData.dat`              |
//! | trains    | `TrainIndex.dat`, `StationIndex.dat`   | `TrainData.dat`, `SeatData.dat` |
//! | tickets   | `OrderIndex.dat`, `QueueIndex.dat`     | `OrderData.dat`             |
//!
//! A service call either succeeds with a response body, is refused with a
//! [`Rejection`] (answered with `-1`), or fails with a storage error, which is
//! fatal for the process.

pub mod tickets;
pub mod trains;
pub mod users;

use std::path::Path;

use crate::storage::btree::{BPlusTree, BTreeError};
use crate::storage::{FixedCodec, RecordError};

pub use tickets::{Order, OrderStatus, Purchase, SortKey, TicketQuery, TicketService};
pub use trains::{MAX_STATIONS, NewTrain, SeatRow, Train, TrainService};
pub use users::{NewUser, ProfileUpdate, User, UserService};

/// Result of a service call.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Open `dir/name` as a tree, with an explicit node capacity if given.
pub(crate) fn open_tree<K, V>(dir: &Path, name: &str, order: Option<usize>) -> Result<BPlusTree<K, V>, BTreeError>
where
    K: FixedCodec + Ord + Copy + std::fmt::Debug,
    V: FixedCodec + Ord + Copy + std::fmt::Debug,
{
    let path = dir.join(name);
    match order {
        Some(order) => BPlusTree::open_with_order(&path, order),
        None => BPlusTree::open(&path),
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The acting user has no session.
    NotLoggedIn,
    AlreadyLoggedIn,
    UnknownUser,
    DuplicateUser,
    WrongPassword,
    /// The acting user's privilege is too low for the request.
    InsufficientPrivilege,
    UnknownTrain,
    DuplicateTrain,
    /// The train's station, price or time lists are inconsistent.
    MalformedTrain,
    AlreadyReleased,
    NotReleased,
    /// No run of the train leaves on the requested day.
    OutsideSaleRange,
    /// The stations are not on the train or are in the wrong order.
    InvalidRoute,
    InvalidTicketCount,
    SoldOut,
    UnknownOrder,
    AlreadyRefunded,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::NotLoggedIn => "user is not logged in",
            Self::AlreadyLoggedIn => "user is already logged in",
            Self::UnknownUser => "unknown user",
            Self::DuplicateUser => "user already exists",
            Self::WrongPassword => "wrong password",
            Self::InsufficientPrivilege => "insufficient privilege",
            Self::UnknownTrain => "unknown train",
            Self::DuplicateTrain => "train already exists",
            Self::MalformedTrain => "inconsistent train description",
            Self::AlreadyReleased => "train is already released",
            Self::NotReleased => "train is not released",
            Self::OutsideSaleRange => "no run on that date",
            Self::InvalidRoute => "invalid route",
            Self::InvalidTicketCount => "invalid ticket count",
            Self::SoldOut => "not enough seats",
            Self::UnknownOrder => "no such order",
            Self::AlreadyRefunded => "order already refunded",
        };
        f.write_str(reason)
    }
}

/// Errors returned by the services.
#[derive(Debug)]
pub enum ServiceError {
    /// The request was refused. Not a failure of the engine.
    Rejected(Rejection),
    /// A record file failed.
    Record(RecordError),
    /// An index tree failed.
    Index(BTreeError),
}

impl ServiceError {
    /// Whether this is a refusal rather than a storage failure.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(r) => write!(f, "rejected: {r}"),
            Self::Record(e) => write!(f, "record error: {e}"),
            Self::Index(e) => write!(f, "index error: {e}"),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rejected(_) => None,
            Self::Record(e) => Some(e),
            Self::Index(e) => Some(e),
        }
    }
}

impl From<Rejection> for ServiceError {
    fn from(r: Rejection) -> Self {
        Self::Rejected(r)
    }
}

impl From<RecordError> for ServiceError {
    fn from(e: RecordError) -> Self {
        Self::Record(e)
    }
}

impl From<BTreeError> for ServiceError {
    fn from(e: BTreeError) -> Self {
        Self::Index(e)
    }
}
