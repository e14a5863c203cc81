//! Bus abstraction.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// A message received from a subscription.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Bytes,
}

/// Stream of messages for one subscription. Ends when the bus closes.
pub type BusStream = BoxStream<'static, BusMessage>;

/// Fire-and-forget publish/subscribe.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Publish without acknowledgment.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Subscribe to a subject pattern (`*` and `>` wildcards).
    async fn subscribe(&self, subject: &str) -> Result<BusStream>;

    /// Subscribe as a member of a queue group: each message goes to one
    /// member of the group.
    async fn queue_subscribe(&self, subject: &str, group: &str) -> Result<BusStream>;

    /// Wait until every publish issued so far has left the process.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
