//! The TCP server: listener, per-connection protocol engines and the
//! notification fan-out that ties them together.

mod connection;
mod listener;
pub mod notify;

pub use listener::Server;

use std::sync::Arc;

use crate::db::{Db, Topic};
use crate::error::Result;
use notify::NotificationBus;

/// State shared by the listener and every connection.
pub(crate) struct Shared {
    pub(crate) db: Db,
    pub(crate) bus: NotificationBus,
}

impl Shared {
    pub(crate) fn new(db: Db) -> Arc<Shared> {
        Arc::new(Shared {
            db,
            bus: NotificationBus::new(),
        })
    }

    /// Stores one posted message and fans the updated topic out to every
    /// live connection, including the poster's own.
    pub(crate) fn post(&self, lines: Vec<String>) -> Result<Arc<Topic>> {
        let updated = self.db.put(lines)?;
        self.bus.broadcast(&updated);
        Ok(updated)
    }
}
