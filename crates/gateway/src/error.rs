//! Gateway error types.

use thiserror::Error;

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Bus connection or publish error.
    #[error("Bus error: {0}")]
    Bus(#[from] anyhow::Error),

    /// Envelope decoding error.
    #[error("Envelope error: {0}")]
    Envelope(#[from] common::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Redis error from the shared websocket directory.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Persistence layer failure.
    #[error("Model error: {0}")]
    Model(String),

    /// Two services registered under the same command prefix.
    #[error("Service prefix registered twice: {0}")]
    DuplicateService(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// WebSocket not owned by this bundle.
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// Channel send error.
    #[error("Channel send error")]
    ChannelSend,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio::sync::mpsc::error::TrySendError<axum::extract::ws::Message>> for GatewayError {
    fn from(_: tokio::sync::mpsc::error::TrySendError<axum::extract::ws::Message>) -> Self {
        GatewayError::ChannelSend
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
