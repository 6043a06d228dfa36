//! The topic/message index.
//!
//! [`Db`] owns three coherent views of the board: topics by name, topics by
//! recency and all messages by recency. The views are frozen together in one
//! immutable [`Snapshot`] published through an [`ArcSwap`]: readers load the
//! current snapshot without blocking, the single writer rebuilds the views
//! copy-on-write under a mutex and swaps the whole snapshot in one release
//! store. A reader that grabbed an older snapshot keeps using it unharmed.
//!
//! Persistence is the filesystem itself: `<root>/topic/<hex-name>/<uuid>`
//! (see [`super::message`]). `put` writes the message file before taking the
//! writer lock, so concurrent posts only serialize on the in-memory update.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::codec::is_encoded_name;
use super::message::Message;
use super::topic::Topic;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};

/// One frozen, fully consistent view of the board.
pub struct Snapshot {
    by_name: HashMap<String, Arc<Topic>>,
    by_recency: Vec<Arc<Topic>>,
    all_messages: Vec<Arc<Message>>,
}

impl Snapshot {
    /// Looks up a topic by its exact name.
    pub fn topic(&self, name: &str) -> Option<&Arc<Topic>> {
        self.by_name.get(name)
    }

    /// All topics, most recently posted-to first.
    pub fn topics(&self) -> &[Arc<Topic>] {
        &self.by_recency
    }

    /// All messages across all topics, newest first.
    pub fn messages(&self) -> &[Arc<Message>] {
        &self.all_messages
    }
}

/// The filesystem-backed board database.
pub struct Db {
    topic_root: PathBuf,
    snapshot: ArcSwap<Snapshot>,
    writer: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl Db {
    /// Opens (or creates) the database under `db_root`.
    pub fn open(db_root: &Path) -> Result<Db> {
        Self::open_with_clock(db_root, Arc::new(SystemClock))
    }

    /// Opens the database with an explicit time source.
    ///
    /// The clock stamps every stored message; tests inject a
    /// [`MockClock`](crate::clock::MockClock) here for deterministic
    /// timestamps.
    pub fn open_with_clock(db_root: &Path, clock: Arc<dyn Clock>) -> Result<Db> {
        ensure_directory(db_root, "database")?;
        let topic_root = db_root.join("topic");
        ensure_directory(&topic_root, "topic")?;

        let snapshot = scan_topic_root(&topic_root)?;
        tracing::info!(
            "opened database at {} with {} topics",
            db_root.display(),
            snapshot.by_recency.len()
        );

        Ok(Db {
            topic_root,
            snapshot: ArcSwap::from_pointee(snapshot),
            writer: Mutex::new(()),
            clock,
        })
    }

    /// The current snapshot; a wait-free acquire load.
    ///
    /// The returned value never changes. Callers wanting to observe later
    /// posts call `snapshot()` again.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Looks up a single topic in the current snapshot.
    pub fn topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.snapshot.load().topic(name).cloned()
    }

    /// Persists a posted message and publishes the updated views.
    ///
    /// `lines` is the raw message as received, meta line first; the meta
    /// line's timestamp is replaced by this server's clock. On any error the
    /// published snapshot is left untouched.
    pub fn put(&self, lines: Vec<String>) -> Result<Arc<Topic>> {
        // Phase 1, concurrent: write the message file.
        let now = self.clock.epoch_seconds();
        let msg = Arc::new(Message::create(&self.topic_root, lines, now)?);

        // Phase 2, serialized: rebuild the three views copy-on-write.
        let _writer = self.writer.lock();
        let current = self.snapshot.load();

        let updated = Arc::new(match current.by_name.get(&msg.topic) {
            Some(old) => old.with_added(msg.clone()),
            None => {
                let dir = self.topic_root.join(super::codec::encode_topic(&msg.topic));
                Topic::from_dir(&dir).ok_or_else(|| {
                    Error::Internal(
                        "could not rebuild the topic view with the new message".to_owned(),
                    )
                })?
            }
        });

        let insert_at = current
            .all_messages
            .partition_point(|m| m.timestamp > msg.timestamp);
        let mut all_messages = Vec::with_capacity(current.all_messages.len() + 1);
        all_messages.extend_from_slice(&current.all_messages[..insert_at]);
        all_messages.push(msg);
        all_messages.extend_from_slice(&current.all_messages[insert_at..]);

        let mut by_recency: Vec<Arc<Topic>> = current
            .by_recency
            .iter()
            .filter(|t| t.name != updated.name)
            .cloned()
            .collect();
        let insert_at = by_recency.partition_point(|t| t.latest > updated.latest);
        by_recency.insert(insert_at, updated.clone());

        let mut by_name = current.by_name.clone();
        by_name.insert(updated.name.clone(), updated.clone());

        self.snapshot.store(Arc::new(Snapshot {
            by_name,
            by_recency,
            all_messages,
        }));

        Ok(updated)
    }
}

fn ensure_directory(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|err| {
            Error::Database(format!(
                "failed to create the {what} directory {}: {err}",
                path.display()
            ))
        })
    } else if !path.is_dir() {
        Err(Error::Database(format!(
            "the {what} path {} is not a directory",
            path.display()
        )))
    } else {
        Ok(())
    }
}

/// Builds the initial snapshot from the directories under the topic root.
///
/// Directory names that are not hex-encoded candidates are skipped silently;
/// candidates that fail to produce a valid topic are dropped with a warning
/// from the topic loader. The database keeps running without them.
fn scan_topic_root(topic_root: &Path) -> Result<Snapshot> {
    let entries = std::fs::read_dir(topic_root).map_err(|err| {
        Error::Database(format!(
            "failed to list the topic directory {}: {err}",
            topic_root.display()
        ))
    })?;

    let mut by_name: HashMap<String, Arc<Topic>> = HashMap::new();
    let mut by_recency: Vec<Arc<Topic>> = Vec::new();
    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !is_encoded_name(file_name) || !path.is_dir() {
            continue;
        }
        let Some(topic) = Topic::from_dir(&path) else {
            continue;
        };
        // Distinct directories can still decode to one topic (hex case);
        // keep the first.
        if by_name.contains_key(&topic.name) {
            tracing::warn!("duplicate topic {:?} at {}; keeping the first", topic.name, path.display());
            continue;
        }
        let topic = Arc::new(topic);
        by_name.insert(topic.name.clone(), topic.clone());
        by_recency.push(topic);
    }

    by_recency.sort_by(|a, b| b.latest.cmp(&a.latest).then_with(|| a.name.cmp(&b.name)));

    let mut all_messages: Vec<Arc<Message>> = by_recency
        .iter()
        .flat_map(|topic| topic.messages().iter().cloned())
        .collect();
    all_messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    Ok(Snapshot {
        by_name,
        by_recency,
        all_messages,
    })
}
