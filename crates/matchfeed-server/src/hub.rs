use std::sync::Arc;

use dashmap::DashMap;
use matchfeed_core::{ConnectionId, ServerMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::connection::{Connection, Frame};
use crate::registry::SubscriptionRegistry;

/// Every open connection plus the subscription registry they share. The
/// single place where connections enter and leave the process.
pub struct ConnectionHub {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    registry: SubscriptionRegistry,
    max_send_queue: usize,
    shutdown: CancellationToken,
}

impl ConnectionHub {
    pub fn new(max_send_queue: usize, shutdown: CancellationToken) -> Self {
        Self {
            connections: DashMap::new(),
            registry: SubscriptionRegistry::new(),
            max_send_queue,
            shutdown,
        }
    }

    /// Admit a new socket: CONNECTING → OPEN, then greet it. The welcome
    /// frame is queued before the connection becomes visible to
    /// broadcasters, so it is always the first frame a client sees.
    pub fn accept(&self) -> (Arc<Connection>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let conn = Arc::new(Connection::new(tx, self.shutdown.child_token()));
        conn.mark_open();
        let _ = conn.send(&ServerMessage::Welcome);
        self.connections.insert(conn.id().clone(), Arc::clone(&conn));
        tracing::info!(connection_id = %conn.id(), open = self.connections.len(), "connection opened");
        (conn, rx)
    }

    /// Close path shared by graceful disconnects, transport errors and
    /// liveness reaping. Cleanup runs exactly once per connection.
    pub fn close(&self, conn: &Connection) {
        conn.begin_close();
        if !conn.finish_close() {
            return;
        }
        let dropped = self.registry.cleanup(conn);
        self.connections.remove(conn.id());
        tracing::info!(
            connection_id = %conn.id(),
            subscriptions = dropped,
            open = self.connections.len(),
            "connection closed"
        );
    }

    /// Forced close of an unresponsive or broken connection.
    pub fn terminate(&self, conn: &Connection, reason: &'static str) {
        if conn.is_open() {
            tracing::warn!(connection_id = %conn.id(), reason, "terminating connection");
        }
        self.close(conn);
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of connections currently in OPEN.
    pub fn open_connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Close every connection. Used at shutdown.
    pub fn close_all(&self) {
        let all: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for conn in all {
            self.close(&conn);
        }
    }
}
