//! Value types shared by the storage layer and the services.

pub mod calendar;
pub mod fixed;
pub mod pair;

pub use calendar::{CalendarError, Clock, Date, DateTime};
pub use fixed::{FixedStr, StationName, Text, TrainId, UserName};
pub use pair::Pair;
