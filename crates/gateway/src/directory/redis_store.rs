//! Redis-backed directory shared by every bundle of a cluster.
//!
//! Key layout:
//! - `ws:account:{account_id}` hash, field = websocket id, value = record JSON
//! - `ws:owner:{websocket_id}` string, value = account id
//! - `device:account:{account_id}` hash, field = device id, value = record JSON

use super::{DeviceRecord, WebsocketDirectory, WebsocketRecord};
use crate::error::Result;
use async_trait::async_trait;
use common::messages::{RegisterDevice, RegisterWebsocket, UnregisterDevice};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

const WS_ACCOUNT_KEY_PREFIX: &str = "ws:account:";
const WS_OWNER_KEY_PREFIX: &str = "ws:owner:";
const DEVICE_ACCOUNT_KEY_PREFIX: &str = "device:account:";

/// Redis client wrapper for directory operations.
///
/// One multiplexed connection is opened on first use and shared by every
/// call; clones of it pipeline over the same socket.
#[derive(Clone)]
pub struct RedisDirectory {
    client: redis::Client,
    connection: Arc<OnceCell<MultiplexedConnection>>,
}

impl RedisDirectory {
    /// Create a new Redis directory.
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        info!("Using Redis websocket directory at {}", redis_url);
        Ok(Self {
            client,
            connection: Arc::new(OnceCell::new()),
        })
    }

    /// Get a handle to the shared connection.
    async fn get_connection(&self) -> Result<MultiplexedConnection> {
        let conn = self
            .connection
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl WebsocketDirectory for RedisDirectory {
    async fn register_websocket(&self, registration: &RegisterWebsocket) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let record = WebsocketRecord {
            websocket_id: registration.websocket_id.clone(),
            bundle_id: registration.bundle_id.clone(),
            device_id: registration.device_id.clone(),
        };
        let json = serde_json::to_string(&record)?;
        let owner_key = format!("{}{}", WS_OWNER_KEY_PREFIX, registration.websocket_id);

        let previous: Option<String> = conn.get(&owner_key).await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        if let Some(previous) = previous.filter(|owner| *owner != registration.user_id) {
            debug!(
                "Websocket {} moves from {} to {}",
                registration.websocket_id, previous, registration.user_id
            );
            pipe.hdel(
                format!("{}{}", WS_ACCOUNT_KEY_PREFIX, previous),
                &registration.websocket_id,
            )
            .ignore();
        }
        pipe.hset(
            format!("{}{}", WS_ACCOUNT_KEY_PREFIX, registration.user_id),
            &registration.websocket_id,
            &json,
        )
        .ignore()
        .set(&owner_key, &registration.user_id)
        .ignore()
        .query_async::<()>(&mut conn)
        .await?;

        debug!(
            "Registered websocket {} of {} on {}",
            registration.websocket_id, registration.user_id, registration.bundle_id
        );
        Ok(())
    }

    async fn unregister_websocket(&self, websocket_id: &str, bundle_id: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let owner_key = format!("{}{}", WS_OWNER_KEY_PREFIX, websocket_id);

        let account_id: Option<String> = conn.get(&owner_key).await?;
        let Some(account_id) = account_id else {
            return Ok(());
        };

        redis::pipe()
            .atomic()
            .hdel(format!("{}{}", WS_ACCOUNT_KEY_PREFIX, account_id), websocket_id)
            .ignore()
            .del(&owner_key)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(
            "Unregistered websocket {} of {} on {}",
            websocket_id, account_id, bundle_id
        );
        Ok(())
    }

    async fn websockets_for(&self, account_id: &str) -> Result<Vec<WebsocketRecord>> {
        let mut conn = self.get_connection().await?;
        let key = format!("{}{}", WS_ACCOUNT_KEY_PREFIX, account_id);

        let values: Vec<String> = conn.hvals(&key).await?;
        let mut records = Vec::with_capacity(values.len());
        for json in values {
            records.push(serde_json::from_str(&json)?);
        }
        Ok(records)
    }

    async fn register_device(&self, registration: &RegisterDevice) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let key = format!("{}{}", DEVICE_ACCOUNT_KEY_PREFIX, registration.user_id);
        let json = serde_json::to_string(&DeviceRecord {
            device_id: registration.device_id.clone(),
            device_token: registration.device_token.clone(),
            device_os: registration.device_os.clone(),
        })?;

        conn.hset::<_, _, _, ()>(&key, &registration.device_id, &json)
            .await?;
        Ok(())
    }

    async fn unregister_device(&self, registration: &UnregisterDevice) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let key = format!("{}{}", DEVICE_ACCOUNT_KEY_PREFIX, registration.user_id);

        conn.hdel::<_, _, ()>(&key, &registration.device_id).await?;
        Ok(())
    }
}
