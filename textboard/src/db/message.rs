//! Message file I/O.
//!
//! One message is one UTF-8 text file with LF-terminated lines. The first
//! line is the meta line `"<epoch_seconds> <topic>"`; the rest is the body.
//! Files live under their topic's directory and are named with a fresh v4
//! UUID. Messages are immutable once written; the server never edits or
//! deletes them.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use uuid::Uuid;

use super::codec::encode_topic;
use super::Timestamp;
use crate::error::{Error, Result};

/// Metadata handle for one message file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The topic this message belongs to.
    pub topic: String,
    /// Server-assigned post time, seconds since the Unix epoch.
    pub timestamp: Timestamp,
    /// Absolute path of the backing file.
    pub path: PathBuf,
}

/// Splits a meta line into `(timestamp, topic)`.
///
/// Requires a single ASCII space with non-empty text on both sides and an
/// unsigned 64-bit decimal timestamp.
pub(crate) fn parse_meta_line(line: &str) -> Option<(Timestamp, &str)> {
    let (timestamp, topic) = line.split_once(' ')?;
    if timestamp.is_empty() || topic.is_empty() {
        return None;
    }
    let timestamp = timestamp.parse::<Timestamp>().ok()?;
    Some((timestamp, topic))
}

impl Message {
    /// Reads message metadata from an existing file.
    ///
    /// Verifies that the meta line parses and that the recorded topic equals
    /// `expected_topic` (a mismatch means the file is misplaced). Any failure
    /// is logged and the file is dropped from the index by returning `None`.
    pub fn load(path: &Path, expected_topic: &str) -> Option<Message> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(err) => {
                tracing::warn!("failed to read message file {}: {err}", path.display());
                return None;
            }
        };

        let mut meta_line = String::new();
        if let Err(err) = BufReader::new(file).read_line(&mut meta_line) {
            tracing::warn!("failed to read message file {}: {err}", path.display());
            return None;
        }
        let meta_line = meta_line.trim_end_matches('\n');

        let Some((timestamp, topic)) = parse_meta_line(meta_line) else {
            tracing::warn!(
                "message {} begins with a malformed meta line",
                path.display()
            );
            return None;
        };
        if topic != expected_topic {
            tracing::warn!("message {} is misplaced", path.display());
            return None;
        }

        Some(Message {
            topic: topic.to_owned(),
            timestamp,
            path: path.to_owned(),
        })
    }

    /// Persists a new message under the topic root and returns its handle.
    ///
    /// `lines[0]` must be an inbound meta line; its client-supplied timestamp
    /// is validated but discarded, and the stored meta line carries `now`
    /// instead. The content is written to a temp file next to the topic
    /// directories and renamed into place so a crash never leaves a partial
    /// message; if the rename cannot be atomic the write falls back to a copy
    /// and logs a warning.
    pub fn create(topic_root: &Path, mut lines: Vec<String>, now: Timestamp) -> Result<Message> {
        let Some(meta_line) = lines.first() else {
            return Err(Error::InvalidMessage(
                "a message has at least a meta line".to_owned(),
            ));
        };
        let Some((_, topic)) = parse_meta_line(meta_line) else {
            return Err(Error::InvalidMessage(format!(
                "malformed meta line: {meta_line:?}"
            )));
        };
        let topic = topic.to_owned();

        let topic_dir = topic_root.join(encode_topic(&topic));
        fs::create_dir_all(&topic_dir).map_err(|source| Error::Store {
            path: topic_dir.clone(),
            source,
        })?;

        // The authoritative timestamp is ours, not the client's.
        lines[0] = format!("{now} {topic}");

        let mut tmp = NamedTempFile::new_in(topic_root).map_err(|source| Error::Store {
            path: topic_root.to_owned(),
            source,
        })?;
        for line in &lines {
            writeln!(tmp, "{line}").map_err(|source| Error::Store {
                path: tmp.path().to_owned(),
                source,
            })?;
        }
        tmp.flush().map_err(|source| Error::Store {
            path: tmp.path().to_owned(),
            source,
        })?;

        let msg_path = topic_dir.join(Uuid::new_v4().to_string());
        if let Err(persist_err) = tmp.persist(&msg_path) {
            // Atomic rename rejected; fall back to a plain copy. The temp
            // file is removed on every path out of here.
            tracing::warn!("failed to move the new message for {topic:?} atomically");
            let tmp = persist_err.file;
            fs::copy(tmp.path(), &msg_path).map_err(|source| Error::Store {
                path: msg_path.clone(),
                source,
            })?;
            if let Err(err) = tmp.close() {
                tracing::warn!("failed to delete obsolete temporary file: {err}");
            }
        }

        Ok(Message {
            topic,
            timestamp: now,
            path: msg_path,
        })
    }

    /// All lines of the message file, meta line first.
    ///
    /// Returns `None` (with a warning) if the file has become unreadable.
    pub fn content(&self) -> Option<Vec<String>> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Some(text.lines().map(str::to_owned).collect()),
            Err(err) => {
                tracing::warn!("failed to read the message {}: {err}", self.path.display());
                None
            }
        }
    }

    /// The message in wire framing: its line count followed by its lines.
    pub fn format(&self) -> Option<Vec<String>> {
        let mut lines = self.content()?;
        lines.insert(0, lines.len().to_string());
        Some(lines)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn inbound(topic: &str, body: &[&str]) -> Vec<String> {
        let mut lines = vec![format!("0 {topic}")];
        lines.extend(body.iter().map(|s| s.to_string()));
        lines
    }

    #[test]
    fn should_create_message_with_server_timestamp() {
        // given
        let root = TempDir::new().unwrap();
        let lines = inbound("hello", &["world"]);

        // when
        let msg = Message::create(root.path(), lines, 1000).unwrap();

        // then - the client timestamp 0 was replaced by the server's
        assert_eq!(msg.topic, "hello");
        assert_eq!(msg.timestamp, 1000);
        let stored = fs::read_to_string(&msg.path).unwrap();
        assert_eq!(stored, "1000 hello\nworld\n");
    }

    #[test]
    fn should_place_message_inside_encoded_topic_directory() {
        // given
        let root = TempDir::new().unwrap();

        // when
        let msg = Message::create(root.path(), inbound("hello", &[]), 7).unwrap();

        // then
        let parent = msg.path.parent().unwrap();
        assert_eq!(parent.file_name().unwrap(), "68656C6C6F");
        assert_eq!(parent.parent().unwrap(), root.path());
    }

    #[test]
    fn should_round_trip_created_message_through_load() {
        // given
        let root = TempDir::new().unwrap();
        let created = Message::create(root.path(), inbound("hello", &["a", "b"]), 42).unwrap();

        // when
        let loaded = Message::load(&created.path, "hello").unwrap();

        // then
        assert_eq!(loaded, created);
    }

    #[test]
    fn should_reject_empty_message() {
        let root = TempDir::new().unwrap();
        let result = Message::create(root.path(), vec![], 1);
        assert!(matches!(result, Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn should_reject_meta_line_without_separator() {
        let root = TempDir::new().unwrap();
        let result = Message::create(root.path(), vec!["12345".to_owned()], 1);
        assert!(matches!(result, Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn should_reject_meta_line_without_topic() {
        let root = TempDir::new().unwrap();
        let result = Message::create(root.path(), vec!["12345 ".to_owned()], 1);
        assert!(matches!(result, Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn should_reject_meta_line_with_non_numeric_timestamp() {
        let root = TempDir::new().unwrap();
        let result = Message::create(root.path(), vec!["soon hello".to_owned()], 1);
        assert!(matches!(result, Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn should_reject_negative_client_timestamp() {
        // given - the timestamp must parse as *unsigned* 64-bit
        let root = TempDir::new().unwrap();

        // when
        let result = Message::create(root.path(), vec!["-5 hello".to_owned()], 1);

        // then
        assert!(matches!(result, Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn should_drop_misplaced_message_on_load() {
        // given - a message stored under "hello" but claiming topic "other"
        let root = TempDir::new().unwrap();
        let msg = Message::create(root.path(), inbound("other", &[]), 1).unwrap();

        // when
        let loaded = Message::load(&msg.path, "hello");

        // then
        assert!(loaded.is_none());
    }

    #[test]
    fn should_drop_message_with_malformed_meta_line_on_load() {
        // given
        let root = TempDir::new().unwrap();
        let path = root.path().join("broken");
        fs::write(&path, "no-separator-here\nbody\n").unwrap();

        // when / then
        assert!(Message::load(&path, "hello").is_none());
    }

    #[test]
    fn should_drop_unreadable_file_on_load() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("missing");
        assert!(Message::load(&path, "hello").is_none());
    }

    #[test]
    fn should_format_message_with_line_count_prefix() {
        // given
        let root = TempDir::new().unwrap();
        let msg = Message::create(root.path(), inbound("hello", &["body line"]), 9).unwrap();

        // when
        let formatted = msg.format().unwrap();

        // then - count covers the meta line plus the body
        assert_eq!(formatted, vec!["2", "9 hello", "body line"]);
    }

    #[test]
    fn should_preserve_unicode_body_lines() {
        // given
        let root = TempDir::new().unwrap();
        let msg = Message::create(root.path(), inbound("Grüße", &["日本語の行"]), 3).unwrap();

        // when
        let content = msg.content().unwrap();

        // then
        assert_eq!(content, vec!["3 Grüße", "日本語の行"]);
    }
}
