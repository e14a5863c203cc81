//! NTFY relay.
//!
//! Consumes the `NTFY.*` subjects as a queue group, so exactly one bundle in
//! the cluster handles each message. Registrations update the shared
//! [`WebsocketDirectory`]; internal pushes are resolved from account ids to
//! live sockets and re-published on [`SUBJECT_GATEWAY`] for the owning
//! bundle to deliver.

use crate::directory::WebsocketDirectory;
use crate::error::Result;
use bytes::Bytes;
use common::messages::{PushInternal, SUBJECT_GATEWAY, SUBJECT_NTFY_ALL};
use common::{PushCommand, WebsocketPush};
use futures::StreamExt;
use nats_client::{BusStream, MessageBus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const NTFY_QUEUE_GROUP: &str = "ntfy";

pub struct NtfyRelay {
    directory: Arc<dyn WebsocketDirectory>,
    bus: Arc<dyn MessageBus>,
}

impl NtfyRelay {
    pub fn new(directory: Arc<dyn WebsocketDirectory>, bus: Arc<dyn MessageBus>) -> Self {
        Self { directory, bus }
    }

    pub async fn run(self: Arc<Self>, shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        info!(
            "Starting NTFY relay, subscribing to '{}' in group '{}'",
            SUBJECT_NTFY_ALL, NTFY_QUEUE_GROUP
        );
        let stream = self
            .bus
            .queue_subscribe(SUBJECT_NTFY_ALL, NTFY_QUEUE_GROUP)
            .await?;
        self.serve(stream, shutdown_rx).await;
        Ok(())
    }

    pub async fn serve(self: Arc<Self>, mut stream: BusStream, mut shutdown_rx: mpsc::Receiver<()>) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("NTFY relay received shutdown signal");
                    break;
                }

                msg = stream.next() => {
                    match msg {
                        Some(msg) => {
                            if let Err(e) = self.handle(&msg.subject, &msg.payload).await {
                                warn!("Failed to handle {}: {:?}", msg.subject, e);
                            }
                        }
                        None => {
                            warn!("NTFY subscription ended unexpectedly");
                            break;
                        }
                    }
                }
            }
        }
        info!("NTFY relay stopped");
    }

    pub async fn handle(&self, subject: &str, payload: &[u8]) -> Result<()> {
        let Some(command) = PushCommand::from_subject(subject, payload)? else {
            debug!("Ignoring message on {}", subject);
            return Ok(());
        };

        match command {
            PushCommand::RegisterWebsocket(registration) => {
                self.directory.register_websocket(&registration).await?;
            }
            PushCommand::UnregisterWebsocket(registration) => {
                self.directory
                    .unregister_websocket(&registration.websocket_id, &registration.bundle_id)
                    .await?;
            }
            PushCommand::RegisterDevice(registration) => {
                self.directory.register_device(&registration).await?;
            }
            PushCommand::UnregisterDevice(registration) => {
                self.directory.unregister_device(&registration).await?;
            }
            PushCommand::PushInternal(push) => {
                let sent = self.fan_out(&push).await?;
                debug!("Relayed internal push to {} sockets", sent);
            }
            // Mobile delivery is a separate consumer.
            PushCommand::PushExternal(_) => {}
        }
        Ok(())
    }

    /// Publish one [`WebsocketPush`] per live socket of every target.
    pub async fn fan_out(&self, push: &PushInternal) -> Result<usize> {
        let mut sent = 0;
        for account_id in &push.targets {
            let sockets = match self.directory.websockets_for(account_id).await {
                Ok(sockets) => sockets,
                Err(e) => {
                    warn!("Failed to look up sockets of {}: {:?}", account_id, e);
                    continue;
                }
            };
            for socket in sockets {
                let envelope = WebsocketPush {
                    bundle_id: socket.bundle_id,
                    websocket_id: socket.websocket_id,
                    payload: push.message.clone(),
                };
                let payload = Bytes::from(serde_json::to_vec(&envelope)?);
                match self.bus.publish(SUBJECT_GATEWAY, payload).await {
                    Ok(()) => sent += 1,
                    Err(e) => warn!("Failed to publish websocket push: {:?}", e),
                }
            }
        }
        Ok(sent)
    }
}
