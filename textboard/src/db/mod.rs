//! The filesystem-backed topic/message database.
//!
//! Layout on disk:
//!
//! ```text
//! <root>/
//!   topic/
//!     <HEX-UTF8-of-topic>/     one directory per topic
//!       <uuid-v4>              one file per message
//! ```
//!
//! [`Db`] keeps the whole board indexed in memory as immutable snapshots and
//! uses the filesystem as the single source of truth: restarting the server
//! over the same root reproduces the same board.

pub mod codec;
mod index;
mod message;
mod topic;

pub use index::{Db, Snapshot};
pub use message::Message;
pub use topic::Topic;

/// Seconds since the Unix epoch.
///
/// Timestamps order messages and topics; everything user-visible is sorted
/// by them in descending order (newest first).
pub type Timestamp = u64;
