//! Textboard - a line-oriented TCP textboard server.
//!
//! The server holds a persistent collection of short multi-line messages
//! grouped by topic, answers read queries over a simple text protocol, and
//! pushes topic-change notifications to every connected client.
//!
//! # Architecture
//!
//! Storage is the filesystem: one directory per topic (named with the hex
//! expansion of the topic's UTF-8 bytes), one file per message, written via
//! temp file + atomic rename. The [`Db`] index keeps three views of the
//! board - topics by name, topics by recency, all messages by recency -
//! frozen together in immutable snapshots. Readers load the current snapshot
//! without locking; the single writer rebuilds the views copy-on-write and
//! swaps them in one atomic publication.
//!
//! The [`Server`] accepts TCP clients and runs one protocol engine per
//! connection. After every successful post the updated topic snapshot is
//! fanned out through per-connection queues and appended to each client's
//! next response as an `N` block.
//!
//! # Key Concepts
//!
//! - **Topic**: a non-empty Unicode string grouping messages. Created on
//!   first post, never deleted. Names are compared byte-for-byte without
//!   Unicode normalization.
//! - **Message**: an immutable file whose first line is the meta line
//!   `"<epoch_seconds> <topic>"`. The timestamp is assigned by the server;
//!   whatever the client sent is discarded.
//! - **Snapshot**: an immutable view published to readers and replaced
//!   wholesale on update. Readers holding an older snapshot are unaffected
//!   by later posts.

pub mod clock;
pub mod config;
pub mod db;
mod error;
pub mod server;

pub use config::{Charset, CliArgs, Config};
pub use db::{Db, Message, Snapshot, Timestamp, Topic};
pub use error::{Error, Result};
pub use server::Server;
