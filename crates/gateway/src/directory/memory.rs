//! In-process directory for single-bundle deployments and tests.

use super::{DeviceRecord, WebsocketDirectory, WebsocketRecord};
use crate::error::Result;
use async_trait::async_trait;
use common::messages::{RegisterDevice, RegisterWebsocket, UnregisterDevice};
use dashmap::DashMap;

#[derive(Default)]
pub struct MemoryDirectory {
    /// Account id → sockets.
    websockets: DashMap<String, Vec<WebsocketRecord>>,
    /// Socket id → account id.
    owners: DashMap<String, String>,
    /// Account id → devices.
    devices: DashMap<String, Vec<DeviceRecord>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of recorded sockets.
    pub fn websocket_count(&self) -> usize {
        self.owners.len()
    }
}

#[async_trait]
impl WebsocketDirectory for MemoryDirectory {
    async fn register_websocket(&self, registration: &RegisterWebsocket) -> Result<()> {
        let record = WebsocketRecord {
            websocket_id: registration.websocket_id.clone(),
            bundle_id: registration.bundle_id.clone(),
            device_id: registration.device_id.clone(),
        };
        let previous = self.owners.insert(
            registration.websocket_id.clone(),
            registration.user_id.clone(),
        );
        if let Some(previous) = previous.filter(|owner| *owner != registration.user_id) {
            if let Some(mut sockets) = self.websockets.get_mut(&previous) {
                sockets.retain(|s| s.websocket_id != record.websocket_id);
            }
            self.websockets.remove_if(&previous, |_, sockets| sockets.is_empty());
        }

        let mut sockets = self
            .websockets
            .entry(registration.user_id.clone())
            .or_default();
        sockets.retain(|s| s.websocket_id != record.websocket_id);
        sockets.push(record);
        Ok(())
    }

    async fn unregister_websocket(&self, websocket_id: &str, bundle_id: &str) -> Result<()> {
        let Some((_, account_id)) = self.owners.remove(websocket_id) else {
            return Ok(());
        };
        if let Some(mut sockets) = self.websockets.get_mut(&account_id) {
            sockets.retain(|s| !(s.websocket_id == websocket_id && s.bundle_id == bundle_id));
        }
        self.websockets.remove_if(&account_id, |_, sockets| sockets.is_empty());
        Ok(())
    }

    async fn websockets_for(&self, account_id: &str) -> Result<Vec<WebsocketRecord>> {
        Ok(self
            .websockets
            .get(account_id)
            .map(|s| s.clone())
            .unwrap_or_default())
    }

    async fn register_device(&self, registration: &RegisterDevice) -> Result<()> {
        let mut devices = self
            .devices
            .entry(registration.user_id.clone())
            .or_default();
        devices.retain(|d| d.device_id != registration.device_id);
        devices.push(DeviceRecord {
            device_id: registration.device_id.clone(),
            device_token: registration.device_token.clone(),
            device_os: registration.device_os.clone(),
        });
        Ok(())
    }

    async fn unregister_device(&self, registration: &UnregisterDevice) -> Result<()> {
        if let Some(mut devices) = self.devices.get_mut(&registration.user_id) {
            devices.retain(|d| {
                !(d.device_id == registration.device_id
                    && d.device_token == registration.device_token)
            });
        }
        Ok(())
    }
}
