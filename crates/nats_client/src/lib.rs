//! Message bus client.
//!
//! The gateway only needs core publish/subscribe: delivery is best effort
//! and nothing is persisted on the bus. [`MessageBus`] is the seam; two
//! implementations are provided:
//!
//! - [`NatsClient`]: NATS core, shared by every bundle of a cluster.
//! - [`MemoryBus`]: in-process broadcast for single-bundle deployments and
//!   tests.

pub mod bus;
pub mod client;
pub mod memory;
pub mod subject;

pub use bus::{BusMessage, BusStream, MessageBus};
pub use client::NatsClient;
pub use memory::MemoryBus;

use std::sync::Arc;

/// Connect to the bus named by `url`.
///
/// `memory` selects the in-process bus; anything else is treated as a NATS
/// server URL.
pub async fn connect(url: &str) -> anyhow::Result<Arc<dyn MessageBus>> {
    if url == "memory" {
        return Ok(Arc::new(MemoryBus::new()));
    }
    Ok(Arc::new(NatsClient::connect(url).await?))
}
