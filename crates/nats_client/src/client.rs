//! NATS core client.

use crate::bus::{BusMessage, BusStream, MessageBus};
use anyhow::Result;
use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info};

/// Wrapper around the NATS client.
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Connect to a NATS server.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);
        let client = async_nats::connect(url).await?;
        Ok(Self { client })
    }
}

fn into_bus_message(msg: async_nats::Message) -> BusMessage {
    BusMessage {
        subject: msg.subject.to_string(),
        payload: msg.payload,
    }
}

#[async_trait]
impl MessageBus for NatsClient {
    /// Publish a message using NATS Core (fire-and-forget, lowest latency).
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        debug!("Publishing {} bytes to {}", payload.len(), subject);
        self.client.publish(subject.to_string(), payload).await?;
        Ok(())
    }

    /// Messages are delivered immediately as they arrive - no polling.
    async fn subscribe(&self, subject: &str) -> Result<BusStream> {
        info!("Subscribing to subject pattern: {}", subject);
        let subscriber = self.client.subscribe(subject.to_string()).await?;
        Ok(subscriber.map(into_bus_message).boxed())
    }

    async fn queue_subscribe(&self, subject: &str, group: &str) -> Result<BusStream> {
        info!("Subscribing to {} in queue group {}", subject, group);
        let subscriber = self
            .client
            .queue_subscribe(subject.to_string(), group.to_string())
            .await?;
        Ok(subscriber.map(into_bus_message).boxed())
    }

    /// Publishes are buffered by the connection task until flushed.
    async fn flush(&self) -> Result<()> {
        self.client.flush().await?;
        Ok(())
    }
}
