// Life of a command:
// 1. A line comes in on stdin
// 2. Split off the timestamp and parse it into a `Command`
// 3. Dispatch to the owning service:
//     - users: accounts and login sessions
//     - trains: timetables, the station index and seat inventory
//     - tickets: searches, orders and the waiting queue
// 4. Answer `[timestamp] body` on stdout
//
// System components:
//  - Disk-backed B+ trees (one file per index)
//  - Fixed-width record files
//  - In-memory session map
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod command;
pub mod config;
pub mod service;
pub mod storage;
pub mod system;
pub mod types;

pub use system::{Flow, SystemError, TicketSystem};
