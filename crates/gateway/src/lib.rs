//! Command-dispatch gateway for the collaboration platform.
//!
//! This service:
//! - Accepts RPC commands over HTTP and WebSocket
//! - Resolves each caller's auth level and routes commands to services
//! - Fans state changes out to connected clients across all bundles
//! - Runs periodic maintenance jobs
//!
//! ## Architecture
//!
//! ```text
//! HTTP / WebSocket ─► Worker ─► Service ─► Model
//!                                  │
//!                                  ▼
//!                             PushManager ─► NTFY.* ─► NtfyRelay (one per cluster)
//!                                                          │
//!                                                          ▼
//!                     WebSocket ◄─ WebsocketDelivery ◄─ GATEWAY (every bundle)
//! ```

pub mod config;
pub mod delivery;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod flags;
pub mod jobs;
pub mod mailer;
pub mod model;
pub mod push;
pub mod registry;
pub mod relay;
pub mod reports;
pub mod server;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

pub use config::GatewayConfig;
pub use delivery::{DeliveryOutcome, WebsocketDelivery};
pub use directory::{MemoryDirectory, RedisDirectory, WebsocketDirectory};
pub use dispatch::{AuthResolver, Requester, Service, Worker, WorkerBuilder};
pub use error::{GatewayError, Result};
pub use flags::{FlagStore, Flags};
pub use jobs::{LicenseJob, OverdueJob, ReportJob, Scheduler};
pub use mailer::{BusMailer, Mailer};
pub use model::{MemoryModel, Model};
pub use push::{PushManager, PushQueue};
pub use registry::{Connection, ConnectionRegistry};
pub use relay::NtfyRelay;
pub use reports::Reporter;
pub use server::{create_router, AppState};
