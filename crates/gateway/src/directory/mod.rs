//! Shared record of which bundle holds which WebSocket.
//!
//! Any bundle can look up "account A has socket W on bundle B" here. The
//! local socket table of each bundle lives in
//! [`ConnectionRegistry`](crate::registry::ConnectionRegistry); this is the
//! cluster-wide index over it.

pub mod memory;
pub mod redis_store;

pub use self::memory::MemoryDirectory;
pub use self::redis_store::RedisDirectory;

use crate::error::Result;
use async_trait::async_trait;
use common::messages::{RegisterDevice, RegisterWebsocket, UnregisterDevice};
use serde::{Deserialize, Serialize};

/// A live socket of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsocketRecord {
    pub websocket_id: String,
    pub bundle_id: String,
    pub device_id: String,
}

/// A registered mobile device of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub device_token: String,
    pub device_os: String,
}

#[async_trait]
pub trait WebsocketDirectory: Send + Sync + 'static {
    async fn register_websocket(&self, registration: &RegisterWebsocket) -> Result<()>;

    /// Remove a socket record. Unknown sockets are ignored.
    async fn unregister_websocket(&self, websocket_id: &str, bundle_id: &str) -> Result<()>;

    /// Live sockets of an account across all bundles.
    async fn websockets_for(&self, account_id: &str) -> Result<Vec<WebsocketRecord>>;

    async fn register_device(&self, registration: &RegisterDevice) -> Result<()>;

    async fn unregister_device(&self, registration: &UnregisterDevice) -> Result<()>;
}
