//! TCP listener and server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::connection::Connection;
use super::Shared;
use crate::db::Db;

/// The textboard server: one listening socket, one task per client.
pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
    shutdown: Notify,
}

impl Server {
    /// Binds the listening socket over the given database.
    pub async fn bind(addr: impl ToSocketAddrs, db: Db) -> std::io::Result<Arc<Server>> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("listening on {}", listener.local_addr()?);
        Ok(Arc::new(Server {
            listener,
            shared: Shared::new(db),
            shutdown: Notify::new(),
        }))
    }

    /// The bound address; useful when binding to port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts clients until [`stop`](Server::stop) is called.
    ///
    /// Each accepted socket is registered with the notification bus and
    /// served on its own task. Accept errors are logged and the loop keeps
    /// going; on shutdown every live connection is closed best-effort.
    pub async fn run(self: Arc<Self>) {
        let mut connections: Vec<JoinHandle<()>> = Vec::new();
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    tracing::info!("stopping the listener");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.retain(|task| !task.is_finished());
                        let (id, notifications) = self.shared.bus.register();
                        let connection =
                            Connection::new(stream, peer, self.shared.clone(), id, notifications);
                        connections.push(tokio::spawn(connection.run()));
                    }
                    Err(err) => {
                        tracing::warn!("failed to accept a connection: {err}");
                        // Transient resource exhaustion must not spin the loop.
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }

        connections.retain(|task| !task.is_finished());
        tracing::info!("closing {} live connections", connections.len());
        for task in &connections {
            task.abort();
        }
        for task in connections {
            let _ = task.await;
        }
        tracing::info!("server stopped");
    }

    /// Requests shutdown; `run` returns after closing live connections.
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;

    async fn bound_server(root: &TempDir) -> Arc<Server> {
        let db = Db::open(root.path()).unwrap();
        Server::bind(("127.0.0.1", 0), db).await.unwrap()
    }

    #[tokio::test]
    async fn should_stop_even_before_run_is_polled() {
        // given
        let root = TempDir::new().unwrap();
        let server = bound_server(&root).await;

        // when - stop is requested before the accept loop starts
        server.stop();
        let handle = tokio::spawn(server.clone().run());

        // then
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("server did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn should_close_live_connections_on_shutdown() {
        // given
        let root = TempDir::new().unwrap();
        let server = bound_server(&root).await;
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(server.clone().run());
        let mut client = TcpStream::connect(addr).await.unwrap();

        // one served round trip proves the connection is registered
        client.write_all(b"L\n").await.unwrap();
        let mut line = [0u8; 2];
        client.read_exact(&mut line).await.unwrap();
        assert_eq!(&line, b"0\n");

        // when
        server.stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("server did not stop")
            .unwrap();

        // then - the client's read side reaches EOF
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .expect("client read did not finish")
            .unwrap();
        assert_eq!(read, 0);
    }
}
