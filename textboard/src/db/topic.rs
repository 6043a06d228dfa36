//! Immutable per-topic snapshots.
//!
//! A [`Topic`] freezes one topic's state: its name, its directory and its
//! messages sorted newest-first. Snapshots are shared behind `Arc` and
//! replaced wholesale on update; a reader holding an older snapshot keeps a
//! consistent view for as long as it likes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::codec::decode_topic;
use super::message::Message;
use super::Timestamp;

/// An immutable view of one topic and its messages.
#[derive(Debug)]
pub struct Topic {
    /// The decoded topic string.
    pub name: String,
    /// The topic's directory under the topic root.
    pub dir: PathBuf,
    /// Timestamp of the newest message, cached from `messages[0]`.
    pub latest: Timestamp,
    messages: Vec<Arc<Message>>,
}

impl Topic {
    /// Builds a snapshot from a topic directory on disk.
    ///
    /// Message files that fail to load are dropped (each logs its own
    /// warning). Returns `None` when the directory name does not decode,
    /// the directory cannot be listed, or no valid message remains; such a
    /// directory is ignored rather than exposed as an empty topic.
    pub fn from_dir(dir: &Path) -> Option<Topic> {
        let file_name = dir.file_name()?.to_str()?;
        let Some(name) = decode_topic(file_name) else {
            tracing::warn!("failed to decode the topic directory name {file_name:?}");
            return None;
        };

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("failed to list files of topic {}: {err}", dir.display());
                return None;
            }
        };

        let mut messages: Vec<Arc<Message>> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| Message::load(&entry.path(), &name))
            .map(Arc::new)
            .collect();
        if messages.is_empty() {
            return None;
        }
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let latest = messages[0].timestamp;
        Some(Topic {
            name,
            dir: dir.to_owned(),
            latest,
            messages,
        })
    }

    /// A new snapshot equal to `self` plus one freshly stored message.
    ///
    /// The message must already live inside this topic's directory. Among
    /// equal timestamps the new message sorts first.
    pub fn with_added(&self, msg: Arc<Message>) -> Topic {
        debug_assert_eq!(msg.topic, self.name);
        debug_assert!(msg.path.starts_with(&self.dir));

        let insert_at = self
            .messages
            .partition_point(|m| m.timestamp > msg.timestamp);
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        messages.extend_from_slice(&self.messages[..insert_at]);
        messages.push(msg);
        messages.extend_from_slice(&self.messages[insert_at..]);

        let latest = messages[0].timestamp;
        Topic {
            name: self.name.clone(),
            dir: self.dir.clone(),
            latest,
            messages,
        }
    }

    /// The topic's messages, newest first.
    pub fn messages(&self) -> &[Arc<Message>] {
        &self.messages
    }
}
