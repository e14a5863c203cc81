//! In-process bus built on a broadcast channel.
//!
//! Every subscriber sees every message and filters by subject locally.
//! Queue groups degenerate to plain subscriptions: a process hosts at most
//! one member per group.

use crate::bus::{BusMessage, BusStream, MessageBus};
use crate::subject::{matches, validate_pattern};
use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// Capacity of the broadcast channel. Receivers that fall behind skip
/// messages.
const BUS_CAPACITY: usize = 4096;

#[derive(Clone)]
pub struct MemoryBus {
    sender: broadcast::Sender<BusMessage>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        // No receivers is not an error on a fire-and-forget bus.
        let _ = self.sender.send(BusMessage {
            subject: subject.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<BusStream> {
        if let Some(reason) = validate_pattern(subject) {
            bail!("Invalid subject pattern {:?}: {}", subject, reason);
        }
        let pattern = subject.to_string();
        let rx = self.sender.subscribe();
        let stream = futures::stream::unfold(rx, move |mut rx| {
            let pattern = pattern.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(msg) if matches(&pattern, &msg.subject) => return Some((msg, rx)),
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Subscriber on {} lagged, skipped {} messages", pattern, skipped);
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn queue_subscribe(&self, subject: &str, _group: &str) -> Result<BusStream> {
        self.subscribe(subject).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_delivers_matching_subjects_only() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("NTFY.>").await.unwrap();

        bus.publish("GATEWAY", Bytes::from_static(b"skip")).await.unwrap();
        bus.publish("NTFY.PUSH.INTERNAL", Bytes::from_static(b"keep")).await.unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.subject, "NTFY.PUSH.INTERNAL");
        assert_eq!(&msg.payload[..], b"keep");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = MemoryBus::new();
        assert!(bus.publish("GATEWAY", Bytes::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_malformed_pattern() {
        let bus = MemoryBus::new();
        assert!(bus.subscribe("NTFY.>.PUSH").await.is_err());
        assert!(bus.queue_subscribe("", "ntfy").await.is_err());
    }

    #[tokio::test]
    async fn test_flush_is_immediate() {
        let bus = MemoryBus::new();
        bus.publish("GATEWAY", Bytes::new()).await.unwrap();
        assert!(bus.flush().await.is_ok());
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_broadcast() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("GATEWAY").await.unwrap();
        let mut b = bus.subscribe("GATEWAY").await.unwrap();
        bus.publish("GATEWAY", Bytes::from_static(b"x")).await.unwrap();
        assert!(a.next().await.is_some());
        assert!(b.next().await.is_some());
    }
}
