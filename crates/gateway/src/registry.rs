//! Local WebSocket connection table of this bundle.
//!
//! Uses lock-free DashMap: connect/disconnect events mutate the table while
//! bus delivery callbacks read it concurrently.

use crate::error::{GatewayError, Result};
use axum::extract::ws::Message;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Buffer size for per-connection outbound channels.
pub const CONNECTION_CHANNEL_BUFFER_SIZE: usize = 256;

/// Account a connection is authenticated as, once its session is recalled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub account_id: String,
    pub device_id: String,
}

/// State for a single live WebSocket.
pub struct Connection {
    /// Websocket id, unique across the cluster.
    pub id: String,
    /// Channel to the socket writer task.
    pub tx: mpsc::Sender<Message>,
    binding: RwLock<Option<Binding>>,
    /// Timestamp when the socket connected.
    pub connected_at: i64,
    /// Timestamp of the last client activity.
    pub last_seen: AtomicI64,
}

impl Connection {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4().simple().to_string(),
            tx,
            binding: RwLock::new(None),
            connected_at: now,
            last_seen: AtomicI64::new(now),
        }
    }

    /// Queue a text frame. Drops the frame when the buffer is full.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        let text: String = text.into();
        self.tx.try_send(Message::Text(text.into()))?;
        Ok(())
    }

    /// Queue a binary frame. Drops the frame when the buffer is full.
    pub fn send_binary(&self, bytes: Vec<u8>) -> Result<()> {
        self.tx.try_send(Message::Binary(bytes.into()))?;
        Ok(())
    }

    pub fn touch(&self) {
        self.last_seen
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_seen_time(&self) -> i64 {
        self.last_seen.load(Ordering::Relaxed)
    }

    pub fn binding(&self) -> Option<Binding> {
        self.binding.read().ok().and_then(|b| b.clone())
    }

    fn set_binding(&self, binding: Option<Binding>) -> Option<Binding> {
        match self.binding.write() {
            Ok(mut current) => std::mem::replace(&mut *current, binding),
            Err(_) => None,
        }
    }
}

/// Registry of sockets owned by this bundle.
pub struct ConnectionRegistry {
    bundle_id: String,
    connections: DashMap<String, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new(bundle_id: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            connections: DashMap::new(),
        }
    }

    pub fn bundle_id(&self) -> &str {
        &self.bundle_id
    }

    /// Register a new connection.
    pub fn register(&self, connection: Arc<Connection>) -> String {
        let id = connection.id.clone();
        self.connections.insert(id.clone(), connection);
        info!("Websocket {} registered", id);
        id
    }

    /// Remove a connection, returning it if it was present.
    pub fn unregister(&self, websocket_id: &str) -> Option<Arc<Connection>> {
        let removed = self.connections.remove(websocket_id).map(|(_, c)| c);
        if removed.is_some() {
            info!("Websocket {} unregistered", websocket_id);
        }
        removed
    }

    pub fn get(&self, websocket_id: &str) -> Option<Arc<Connection>> {
        self.connections.get(websocket_id).map(|c| c.clone())
    }

    pub fn contains(&self, websocket_id: &str) -> bool {
        self.connections.contains_key(websocket_id)
    }

    /// Attach an account to a live connection, returning the binding it
    /// replaced.
    pub fn bind(&self, websocket_id: &str, binding: Binding) -> Result<Option<Binding>> {
        let connection = self
            .get(websocket_id)
            .ok_or_else(|| GatewayError::ConnectionNotFound(websocket_id.to_string()))?;
        debug!(
            "Websocket {} bound to account {}",
            websocket_id, binding.account_id
        );
        Ok(connection.set_binding(Some(binding)))
    }

    /// Detach the account from a connection, returning the old binding.
    pub fn unbind(&self, websocket_id: &str) -> Option<Binding> {
        self.get(websocket_id).and_then(|c| c.set_binding(None))
    }

    /// Write an already-serialized frame to a local socket.
    pub fn deliver(&self, websocket_id: &str, payload: &str) -> Result<()> {
        let connection = self
            .get(websocket_id)
            .ok_or_else(|| GatewayError::ConnectionNotFound(websocket_id.to_string()))?;
        connection.send_text(payload)
    }

    /// Get the total number of connected sockets.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of connections bound to an account.
    pub fn bound_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|c| c.binding().is_some())
            .count()
    }

    /// Remove connections idle for longer than `max_idle_ms`.
    pub fn cleanup_stale(&self, max_idle_ms: i64) -> Vec<Arc<Connection>> {
        let now = Utc::now().timestamp_millis();
        let stale_ids: Vec<String> = self
            .connections
            .iter()
            .filter(|c| now - c.last_seen_time() > max_idle_ms)
            .map(|c| c.key().clone())
            .collect();

        stale_ids
            .into_iter()
            .filter_map(|id| {
                warn!("Removing stale websocket {}", id);
                self.unregister(&id)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> (Arc<Connection>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(CONNECTION_CHANNEL_BUFFER_SIZE);
        (Arc::new(Connection::new(tx)), rx)
    }

    #[tokio::test]
    async fn test_deliver_to_local_socket() {
        let registry = ConnectionRegistry::new("b1");
        let (conn, mut rx) = connection();
        let id = registry.register(conn);

        registry.deliver(&id, "hello").unwrap();
        match rx.recv().await {
            Some(Message::Text(text)) => assert_eq!(text.as_str(), "hello"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_deliver_to_missing_socket() {
        let registry = ConnectionRegistry::new("b1");
        assert!(matches!(
            registry.deliver("nope", "hello"),
            Err(GatewayError::ConnectionNotFound(_))
        ));
    }

    #[test]
    fn test_bind_and_unbind() {
        let registry = ConnectionRegistry::new("b1");
        let (conn, _rx) = connection();
        let id = registry.register(conn);

        let binding = Binding {
            account_id: "alice".into(),
            device_id: "web".into(),
        };
        assert_eq!(registry.bind(&id, binding.clone()).unwrap(), None);
        assert_eq!(registry.bind(&id, binding.clone()).unwrap(), Some(binding.clone()));
        assert_eq!(registry.bound_count(), 1);
        assert_eq!(registry.unbind(&id), Some(binding));
        assert_eq!(registry.bound_count(), 0);
    }

    #[test]
    fn test_unregister_returns_connection() {
        let registry = ConnectionRegistry::new("b1");
        let (conn, _rx) = connection();
        let id = registry.register(conn);
        assert!(registry.unregister(&id).is_some());
        assert!(registry.unregister(&id).is_none());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_full_buffer_drops_frames() {
        let registry = ConnectionRegistry::new("b1");
        let (tx, _rx) = mpsc::channel(1);
        let id = registry.register(Arc::new(Connection::new(tx)));
        assert!(registry.deliver(&id, "one").is_ok());
        assert!(matches!(
            registry.deliver(&id, "two"),
            Err(GatewayError::ChannelSend)
        ));
    }
}
