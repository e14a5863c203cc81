//! Gateway configuration, read from the environment.

use crate::error::{GatewayError, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration for one bundle.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Identifies this bundle among its siblings.
    pub bundle_id: String,
    pub http_port: u16,
    pub metrics_port: u16,
    /// NATS server URL, or `memory` for an in-process bus.
    pub bus_url: String,
    /// Shared websocket directory; in-process when unset.
    pub redis_url: Option<String>,
    /// Number of tasks publishing push messages.
    pub push_workers: usize,
    /// Bounded capacity of the push queue.
    pub push_queue_capacity: usize,
    /// Run the notification relay in this bundle.
    pub ntfy_relay: bool,
    /// Time the transport waits for a reply before answering `Timeout`.
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bundle_id: default_bundle_id(),
            http_port: 8082,
            metrics_port: 9093,
            bus_url: "nats://localhost:4222".to_string(),
            redis_url: None,
            push_workers: 4,
            push_queue_capacity: 1024,
            ntfy_relay: true,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    /// Read configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            bundle_id: env::var("BUNDLE_ID").unwrap_or(defaults.bundle_id),
            http_port: parse_var("HTTP_PORT", defaults.http_port)?,
            metrics_port: parse_var("METRICS_PORT", defaults.metrics_port)?,
            bus_url: env::var("BUS_URL").unwrap_or(defaults.bus_url),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            push_workers: parse_var("PUSH_WORKERS", defaults.push_workers)?,
            push_queue_capacity: parse_var("PUSH_QUEUE_CAPACITY", defaults.push_queue_capacity)?,
            ntfy_relay: parse_var("NTFY_RELAY", defaults.ntfy_relay)?,
            request_timeout: Duration::from_secs(parse_var(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
        };
        if config.push_workers == 0 {
            return Err(GatewayError::Config("PUSH_WORKERS must be at least 1".to_string()));
        }
        Ok(config)
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| GatewayError::Config(format!("{} must be a valid value, got {:?}", name, raw))),
        Err(_) => Ok(default),
    }
}

fn default_bundle_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("bundle-{}", &id[..8])
}
