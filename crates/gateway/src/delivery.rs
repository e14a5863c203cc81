//! Cross-bundle WebSocket delivery.
//!
//! Every bundle subscribes to [`SUBJECT_GATEWAY`] and sees every
//! [`WebsocketPush`]. Only the bundle named in the envelope acts on it: it
//! writes the payload to the local socket, or drops the shared directory
//! record when the socket is gone.

use crate::directory::WebsocketDirectory;
use crate::error::{GatewayError, Result};
use crate::registry::ConnectionRegistry;
use common::messages::SUBJECT_GATEWAY;
use common::WebsocketPush;
use futures::StreamExt;
use metrics::counter;
use nats_client::{BusStream, MessageBus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What a bundle did with one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Addressed to another bundle.
    NotOwned,
    /// Socket missing locally; the directory record was removed.
    SelfHealed,
    /// Socket present but its buffer is full or closed.
    Dropped,
}

pub struct WebsocketDelivery {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<dyn WebsocketDirectory>,
    bus: Arc<dyn MessageBus>,
}

impl WebsocketDelivery {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        directory: Arc<dyn WebsocketDirectory>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            registry,
            directory,
            bus,
        }
    }

    /// Subscribe and deliver until shutdown.
    pub async fn run(self: Arc<Self>, shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        info!("Starting websocket delivery, subscribing to '{}'", SUBJECT_GATEWAY);
        let stream = self.bus.subscribe(SUBJECT_GATEWAY).await?;
        self.serve(stream, shutdown_rx).await;
        Ok(())
    }

    /// Deliver envelopes from an existing subscription until shutdown.
    pub async fn serve(self: Arc<Self>, mut stream: BusStream, mut shutdown_rx: mpsc::Receiver<()>) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Websocket delivery received shutdown signal");
                    break;
                }

                msg = stream.next() => {
                    match msg {
                        Some(msg) => {
                            if let Err(e) = self.handle_message(&msg.payload).await {
                                warn!("Failed to handle websocket push: {:?}", e);
                            }
                        }
                        None => {
                            warn!("Gateway subscription ended unexpectedly");
                            break;
                        }
                    }
                }
            }
        }
        info!("Websocket delivery stopped");
    }

    async fn handle_message(&self, payload: &[u8]) -> Result<DeliveryOutcome> {
        let push: WebsocketPush = serde_json::from_slice(payload)?;
        Ok(self.handle_push(&push).await)
    }

    pub async fn handle_push(&self, push: &WebsocketPush) -> DeliveryOutcome {
        if push.bundle_id != self.registry.bundle_id() {
            return DeliveryOutcome::NotOwned;
        }

        match self.registry.deliver(&push.websocket_id, &push.payload) {
            Ok(()) => {
                counter!("gateway_ws_deliveries_total").increment(1);
                DeliveryOutcome::Delivered
            }
            Err(GatewayError::ConnectionNotFound(_)) => {
                warn!(
                    "Websocket {} is gone, removing its directory record",
                    push.websocket_id
                );
                counter!("gateway_ws_self_heal_total").increment(1);
                if let Err(e) = self
                    .directory
                    .unregister_websocket(&push.websocket_id, &push.bundle_id)
                    .await
                {
                    warn!("Failed to remove stale websocket record: {:?}", e);
                }
                DeliveryOutcome::SelfHealed
            }
            Err(e) => {
                debug!("Failed to write to websocket {}: {:?}", push.websocket_id, e);
                DeliveryOutcome::Dropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::registry::{Connection, CONNECTION_CHANNEL_BUFFER_SIZE};
    use crate::testing::RecordingBus;
    use axum::extract::ws::Message;
    use bytes::Bytes;
    use common::messages::RegisterWebsocket;
    use nats_client::MemoryBus;
    use std::time::Duration;

    struct Bundle {
        registry: Arc<ConnectionRegistry>,
        delivery: WebsocketDelivery,
    }

    fn bundle(id: &str, directory: Arc<MemoryDirectory>) -> Bundle {
        let registry = Arc::new(ConnectionRegistry::new(id));
        let delivery = WebsocketDelivery::new(
            registry.clone(),
            directory,
            Arc::new(RecordingBus::new()),
        );
        Bundle { registry, delivery }
    }

    fn connect(bundle: &Bundle) -> (String, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(CONNECTION_CHANNEL_BUFFER_SIZE);
        let id = bundle.registry.register(Arc::new(Connection::new(tx)));
        (id, rx)
    }

    fn push(bundle_id: &str, websocket_id: &str) -> WebsocketPush {
        WebsocketPush {
            bundle_id: bundle_id.into(),
            websocket_id: websocket_id.into(),
            payload: r#"{"type":"p","cmd":"sync-p","data":{}}"#.into(),
        }
    }

    async fn register(directory: &MemoryDirectory, bundle_id: &str, websocket_id: &str) {
        directory
            .register_websocket(&RegisterWebsocket {
                user_id: "alice".into(),
                device_id: "d1".into(),
                bundle_id: bundle_id.into(),
                websocket_id: websocket_id.into(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_only_owner_delivers() {
        let directory = Arc::new(MemoryDirectory::new());
        let b1 = bundle("b1", directory.clone());
        let b2 = bundle("b2", directory.clone());
        let (ws, mut rx) = connect(&b1);
        register(&directory, "b1", &ws).await;

        let envelope = push("b1", &ws);
        assert_eq!(b1.delivery.handle_push(&envelope).await, DeliveryOutcome::Delivered);
        assert_eq!(b2.delivery.handle_push(&envelope).await, DeliveryOutcome::NotOwned);

        match rx.try_recv().unwrap() {
            Message::Text(text) => assert_eq!(text.as_str(), envelope.payload),
            other => panic!("unexpected frame {other:?}"),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(directory.websocket_count(), 1);
    }

    #[tokio::test]
    async fn test_no_delivery_after_unregister() {
        let directory = Arc::new(MemoryDirectory::new());
        let b1 = bundle("b1", directory.clone());
        let (ws, mut rx) = connect(&b1);
        register(&directory, "b1", &ws).await;

        b1.registry.unregister(&ws);
        directory.unregister_websocket(&ws, "b1").await.unwrap();

        let outcome = b1.delivery.handle_push(&push("b1", &ws)).await;
        assert_ne!(outcome, DeliveryOutcome::Delivered);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_socket_self_heals() {
        let directory = Arc::new(MemoryDirectory::new());
        let b1 = bundle("b1", directory.clone());
        register(&directory, "b1", "dead").await;

        let outcome = b1.delivery.handle_push(&push("b1", "dead")).await;
        assert_eq!(outcome, DeliveryOutcome::SelfHealed);
        assert_eq!(directory.websocket_count(), 0);
        assert!(directory.websockets_for("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_serve_over_bus() {
        let bus = Arc::new(MemoryBus::new());
        let directory = Arc::new(MemoryDirectory::new());
        let registry = Arc::new(ConnectionRegistry::new("b1"));
        let (tx, mut rx) = mpsc::channel(CONNECTION_CHANNEL_BUFFER_SIZE);
        let ws = registry.register(Arc::new(Connection::new(tx)));

        let delivery = Arc::new(WebsocketDelivery::new(registry, directory, bus.clone()));
        let stream = bus.subscribe(SUBJECT_GATEWAY).await.unwrap();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(delivery.serve(stream, shutdown_rx));

        let payload = serde_json::to_vec(&push("b1", &ws)).unwrap();
        bus.publish(SUBJECT_GATEWAY, Bytes::from(payload)).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(frame, Message::Text(_)));

        shutdown_tx.send(()).await.unwrap();
        handle.await.unwrap();
    }
}
