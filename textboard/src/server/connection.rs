//! Per-connection protocol engine.
//!
//! The wire protocol is line-oriented with LF terminators, UTF-8 encoded.
//! A session alternates between reading one command, handling it, and
//! appending any queued topic-change notifications before the turn's output
//! is flushed:
//!
//! | opcode | syntax    | behavior                                          |
//! |--------|-----------|---------------------------------------------------|
//! | `X`    | `X`       | close the session                                 |
//! | `P`    | `P`       | post: `M`, then per message `K` + `K` lines       |
//! | `L`    | `L [N]`   | list up to `N` topics by recency (all if omitted) |
//! | `T`    | `T <top>` | dump a topic's messages, newest first             |
//! | `W`    | `W <ts>`  | dump all messages with timestamp >= `ts`          |
//!
//! Anything else, and any malformed argument, answers `E <reason>` and the
//! session continues. The notification suffix is `N <count>` followed by
//! one `"<latest> <topic>"` line per changed topic.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;

use super::notify::{self, ConnectionId};
use super::Shared;
use crate::db::{Timestamp, Topic};

/// How a session ended.
enum Disconnect {
    /// The client sent `X`.
    Close,
    /// The client shut its input down.
    Eof,
}

/// Errors inside one protocol turn.
///
/// Protocol violations are recoverable: the engine answers `E <reason>` and
/// keeps the session. I/O errors terminate the connection.
enum TurnError {
    Io(std::io::Error),
    Protocol(String),
}

impl TurnError {
    fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol(reason.into())
    }
}

impl From<std::io::Error> for TurnError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// One client session.
pub(crate) struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    shared: Arc<Shared>,
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    notifications: UnboundedReceiver<Arc<Topic>>,
}

impl Connection {
    pub(crate) fn new(
        stream: TcpStream,
        peer: SocketAddr,
        shared: Arc<Shared>,
        id: ConnectionId,
        notifications: UnboundedReceiver<Arc<Topic>>,
    ) -> Connection {
        let (read_half, write_half) = stream.into_split();
        Connection {
            id,
            peer,
            shared,
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            notifications,
        }
    }

    /// Drives the session until the client leaves, then deregisters.
    pub(crate) async fn run(mut self) {
        tracing::info!("client connected from {} (connection {})", self.peer, self.id);
        let result = self.serve().await;
        self.shared.bus.deregister(self.id);
        match result {
            Ok(Disconnect::Close) => tracing::info!("client {} closed the session", self.peer),
            Ok(Disconnect::Eof) => tracing::info!("client {} disconnected", self.peer),
            Err(err) => tracing::warn!("client {} dropped: {err}", self.peer),
        }
    }

    async fn serve(&mut self) -> std::io::Result<Disconnect> {
        loop {
            let Some(raw) = self.read_raw_line().await? else {
                return Ok(Disconnect::Eof);
            };
            match String::from_utf8(raw) {
                Ok(line) if line == "X" => return Ok(Disconnect::Close),
                Ok(line) => self.dispatch(&line).await?,
                Err(_) => self.write_line("E invalid character encoding").await?,
            }
            self.emit_notifications().await?;
            self.writer.flush().await?;
        }
    }

    async fn dispatch(&mut self, line: &str) -> std::io::Result<()> {
        let outcome = match split_command(line) {
            Some(('P', None)) => self.handle_post().await,
            Some(('P', Some(_))) => Err(TurnError::protocol("P takes no argument")),
            Some(('L', arg)) => self.handle_list(arg).await,
            Some(('T', arg)) => self.handle_topic(arg).await,
            Some(('W', arg)) => self.handle_news(arg).await,
            // A bare `X` never reaches dispatch; with an argument it is a
            // recoverable error, not a close.
            Some(('X', _)) => Err(TurnError::protocol("X takes no argument")),
            Some((opcode, _)) => Err(TurnError::protocol(format!("unknown command {opcode:?}"))),
            None => Err(TurnError::protocol(format!("unknown command {line:?}"))),
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(TurnError::Protocol(reason)) => self.write_line(&format!("E {reason}")).await,
            Err(TurnError::Io(err)) => Err(err),
        }
    }

    /// `P`: `M` messages, each sent as `K` followed by `K` raw lines.
    ///
    /// Each message is persisted and broadcast on its own; one rejected
    /// message answers an `E` line without discarding the rest of the batch.
    async fn handle_post(&mut self) -> Result<(), TurnError> {
        let message_count = parse_count(&self.read_text_line().await?, "message count")?;
        for _ in 0..message_count {
            let line_count = parse_count(&self.read_text_line().await?, "line count")?;
            let mut lines = Vec::new();
            for _ in 0..line_count {
                lines.push(self.read_text_line().await?);
            }
            if let Err(err) = self.shared.post(lines) {
                tracing::warn!("client {}: post rejected: {err}", self.peer);
                self.write_line(&format!("E {err}")).await?;
            }
        }
        Ok(())
    }

    /// `L [N]`: up to `N` topics by recency, as `"<latest> <topic>"` lines.
    async fn handle_list(&mut self, arg: Option<&str>) -> Result<(), TurnError> {
        let limit = match arg {
            Some(arg) => parse_count(arg, "topic count")?,
            None => usize::MAX,
        };
        let snapshot = self.shared.db.snapshot();
        let topics = snapshot.topics();
        let count = topics.len().min(limit);
        self.write_line(&count.to_string()).await?;
        for topic in &topics[..count] {
            self.write_line(&format!("{} {}", topic.latest, topic.name))
                .await?;
        }
        Ok(())
    }

    /// `T <topic>`: the topic's total line count, then every message in
    /// recency order. An unknown topic answers `0`.
    async fn handle_topic(&mut self, arg: Option<&str>) -> Result<(), TurnError> {
        let name = match arg {
            Some(name) if !name.is_empty() => name,
            _ => return Err(TurnError::protocol("T requires a topic argument")),
        };
        let Some(topic) = self.shared.db.topic(name) else {
            return Ok(self.write_line("0").await?);
        };

        let formatted: Vec<Vec<String>> = topic
            .messages()
            .iter()
            .filter_map(|msg| msg.format())
            .collect();
        let total_lines: usize = formatted.iter().map(|msg| msg.len() - 1).sum();
        self.write_line(&total_lines.to_string()).await?;
        for msg in &formatted {
            for line in msg {
                self.write_line(line).await?;
            }
        }
        Ok(())
    }

    /// `W <ts>`: all messages with `timestamp >= ts`, newest first.
    async fn handle_news(&mut self, arg: Option<&str>) -> Result<(), TurnError> {
        let arg = arg.ok_or_else(|| TurnError::protocol("W requires a timestamp argument"))?;
        let since: Timestamp = arg.parse().map_err(|_| {
            TurnError::protocol(format!(
                "timestamp must be a non-negative integer, got {arg:?}"
            ))
        })?;

        let snapshot = self.shared.db.snapshot();
        let messages = snapshot.messages();
        // The global list is sorted descending, so the matches are exactly
        // the prefix before the first message older than `since`.
        let limit = messages.partition_point(|msg| msg.timestamp >= since);
        let formatted: Vec<Vec<String>> = messages[..limit]
            .iter()
            .filter_map(|msg| msg.format())
            .collect();

        self.write_line(&formatted.len().to_string()).await?;
        for msg in &formatted {
            for line in msg {
                self.write_line(line).await?;
            }
        }
        Ok(())
    }

    /// Appends the `N` block for any topic changes queued since the last
    /// turn.
    async fn emit_notifications(&mut self) -> std::io::Result<()> {
        let batch = notify::drain(&mut self.notifications);
        if batch.is_empty() {
            return Ok(());
        }
        self.write_line(&format!("N {}", batch.len())).await?;
        for topic in &batch {
            self.write_line(&format!("{} {}", topic.latest, topic.name))
                .await?;
        }
        Ok(())
    }

    /// Reads one raw line, stripping the LF terminator (and a CR before it).
    /// `None` means the client shut its input down.
    async fn read_raw_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        if self.reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        Ok(Some(buf))
    }

    /// Reads one line belonging to the command in progress.
    async fn read_text_line(&mut self) -> Result<String, TurnError> {
        let raw = self
            .read_raw_line()
            .await?
            .ok_or_else(|| TurnError::protocol("unexpected end of input"))?;
        String::from_utf8(raw).map_err(|_| TurnError::protocol("invalid character encoding"))
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await
    }
}

/// Splits a command line into its opcode and optional argument.
///
/// The argument starts right after a single space following the opcode;
/// any other character there makes the whole line an unknown command.
fn split_command(line: &str) -> Option<(char, Option<&str>)> {
    let mut chars = line.char_indices();
    let (_, opcode) = chars.next()?;
    match chars.next() {
        None => Some((opcode, None)),
        Some((idx, ' ')) => Some((opcode, Some(&line[idx + 1..]))),
        Some(_) => None,
    }
}

/// Parses a non-negative count argument.
fn parse_count(text: &str, what: &str) -> Result<usize, TurnError> {
    text.parse::<usize>().map_err(|_| {
        TurnError::protocol(format!("{what} must be a non-negative integer, got {text:?}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_split_bare_opcode() {
        assert!(matches!(split_command("L"), Some(('L', None))));
    }

    #[test]
    fn should_split_opcode_with_argument() {
        assert!(matches!(split_command("T my topic"), Some(('T', Some("my topic")))));
    }

    #[test]
    fn should_keep_spaces_inside_argument() {
        let (_, arg) = split_command("W  42").unwrap();
        assert_eq!(arg, Some(" 42"));
    }

    #[test]
    fn should_reject_opcode_not_followed_by_space() {
        assert!(split_command("List").is_none());
        assert!(split_command("").is_none());
    }

    #[test]
    fn should_parse_valid_count() {
        assert!(matches!(parse_count("17", "count"), Ok(17)));
    }

    #[test]
    fn should_reject_negative_count() {
        assert!(parse_count("-1", "count").is_err());
    }

    #[test]
    fn should_reject_non_numeric_count() {
        assert!(parse_count("many", "count").is_err());
        assert!(parse_count("", "count").is_err());
    }
}
