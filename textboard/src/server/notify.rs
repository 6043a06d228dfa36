//! Topic-change notification fan-out.
//!
//! Every connection owns an unbounded MPSC queue of topic snapshots. After a
//! successful post the server broadcasts the updated snapshot into every
//! live queue; each connection drains its own queue between protocol turns.
//! The registry doubles as the live-connection set, keyed by a monotonically
//! increasing connection id so iteration order is stable.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::db::Topic;

/// Stable identifier of one live connection.
pub type ConnectionId = u64;

/// The per-connection queues of pending topic-change events.
pub struct NotificationBus {
    subscribers: Mutex<BTreeMap<ConnectionId, UnboundedSender<Arc<Topic>>>>,
    next_id: AtomicU64,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers a new connection and hands it the receiving end of its
    /// queue.
    pub fn register(&self) -> (ConnectionId, UnboundedReceiver<Arc<Topic>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().insert(id, tx);
        (id, rx)
    }

    /// Removes a closed connection from the live set.
    pub fn deregister(&self, id: ConnectionId) {
        self.subscribers.lock().remove(&id);
    }

    /// Enqueues an updated topic snapshot into every live queue.
    ///
    /// A send can only fail when the receiving connection is already gone;
    /// it will deregister itself, so the failure is ignored here.
    pub fn broadcast(&self, updated: &Arc<Topic>) {
        for sender in self.subscribers.lock().values() {
            let _ = sender.send(updated.clone());
        }
    }

    /// Number of live connections, for logging and tests.
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Empties a connection's queue and returns the deduplicated batch.
///
/// When one topic appears several times in the drained batch only the
/// snapshot with the greatest `latest` survives. The result is sorted for
/// emission: descending by `latest`, ties by name.
pub fn drain(queue: &mut UnboundedReceiver<Arc<Topic>>) -> Vec<Arc<Topic>> {
    let mut newest: HashMap<String, Arc<Topic>> = HashMap::new();
    while let Ok(topic) = queue.try_recv() {
        match newest.get(&topic.name) {
            Some(seen) if seen.latest >= topic.latest => {}
            _ => {
                newest.insert(topic.name.clone(), topic);
            }
        }
    }

    let mut batch: Vec<Arc<Topic>> = newest.into_values().collect();
    batch.sort_by(|a, b| b.latest.cmp(&a.latest).then_with(|| a.name.cmp(&b.name)));
    batch
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::db::{codec::encode_topic, Message, Timestamp};

    fn topic(root: &TempDir, name: &str, latest: Timestamp) -> Arc<Topic> {
        let lines = vec![format!("0 {name}"), "body".to_owned()];
        Message::create(root.path(), lines, latest).unwrap();
        let dir = root.path().join(encode_topic(name));
        Arc::new(Topic::from_dir(&dir).unwrap())
    }

    #[test]
    fn should_deliver_broadcast_to_every_registered_connection() {
        // given
        let root = TempDir::new().unwrap();
        let bus = NotificationBus::new();
        let (_a, mut rx_a) = bus.register();
        let (_b, mut rx_b) = bus.register();
        let updated = topic(&root, "hello", 10);

        // when
        bus.broadcast(&updated);

        // then
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[test]
    fn should_not_deliver_to_deregistered_connection() {
        // given
        let root = TempDir::new().unwrap();
        let bus = NotificationBus::new();
        let (id, mut rx) = bus.register();
        bus.deregister(id);

        // when
        bus.broadcast(&topic(&root, "hello", 10));

        // then
        assert!(drain(&mut rx).is_empty());
        assert!(bus.is_empty());
    }

    #[test]
    fn should_keep_newest_snapshot_per_topic_on_drain() {
        // given - the same topic enqueued twice, newer snapshot second
        let root = TempDir::new().unwrap();
        let bus = NotificationBus::new();
        let (_id, mut rx) = bus.register();
        bus.broadcast(&topic(&root, "hello", 10));
        bus.broadcast(&topic(&root, "hello", 20));

        // when
        let batch = drain(&mut rx);

        // then
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].latest, 20);
    }

    #[test]
    fn should_sort_drained_batch_by_recency() {
        // given
        let root = TempDir::new().unwrap();
        let bus = NotificationBus::new();
        let (_id, mut rx) = bus.register();
        bus.broadcast(&topic(&root, "older", 10));
        bus.broadcast(&topic(&root, "newest", 30));
        bus.broadcast(&topic(&root, "middle", 20));

        // when
        let batch = drain(&mut rx);

        // then
        let names: Vec<_> = batch.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["newest", "middle", "older"]);
    }

    #[test]
    fn should_drain_nothing_from_idle_queue() {
        let bus = NotificationBus::new();
        let (_id, mut rx) = bus.register();
        assert!(drain(&mut rx).is_empty());
    }
}
