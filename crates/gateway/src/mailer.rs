//! Outbound mail boundary. Actual SMTP delivery happens in a separate
//! consumer of [`SUBJECT_MAIL_POST`].

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use common::messages::SUBJECT_MAIL_POST;
use nats_client::MessageBus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Request to mail a post to external recipients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMail {
    pub post_id: String,
    pub sender_id: String,
    pub recipients: Vec<String>,
}

#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send_post(&self, mail: PostMail) -> Result<()>;
}

pub struct BusMailer {
    bus: Arc<dyn MessageBus>,
}

impl BusMailer {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Mailer for BusMailer {
    async fn send_post(&self, mail: PostMail) -> Result<()> {
        let payload = serde_json::to_vec(&mail)?;
        self.bus.publish(SUBJECT_MAIL_POST, Bytes::from(payload)).await?;
        Ok(())
    }
}
