//! Fixtures shared by the unit tests.

use crate::model::{Account, AppGrant, MemoryModel, Place, Session};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use nats_client::{BusMessage, BusStream, MessageBus};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const ALICE_SESSION: (&str, &str) = ("sk-alice", "ss-alice");
pub const BOB_SESSION: (&str, &str) = ("sk-bob", "ss-bob");
pub const ADMIN_SESSION: (&str, &str) = ("sk-admin", "ss-admin");
/// Scope 2 token issued for alice.
pub const APP_ID: &str = "app-1";
pub const APP_TOKEN: &str = "tok-1";

fn account(id: &str, name: &str, admin: bool) -> Account {
    Account {
        id: id.into(),
        name: name.into(),
        picture: format!("{id}.png"),
        admin,
    }
}

fn session((key, secret): (&str, &str), account_id: &str) -> Session {
    Session {
        key: key.into(),
        secret: secret.into(),
        account_id: account_id.into(),
    }
}

/// alice and bob share `p1`; carol alone owns `p2`.
pub fn seeded_model() -> Arc<MemoryModel> {
    let model = MemoryModel::new();
    model.insert_account(account("alice", "Alice", false));
    model.insert_account(account("bob", "Bob", false));
    model.insert_account(account("carol", "Carol", false));
    model.insert_account(account("root", "Root", true));
    model.insert_session(session(ALICE_SESSION, "alice"));
    model.insert_session(session(BOB_SESSION, "bob"));
    model.insert_session(session(ADMIN_SESSION, "root"));
    model.insert_app(
        AppGrant {
            app_id: APP_ID.into(),
            account_id: "alice".into(),
            scope: 2,
        },
        APP_TOKEN,
    );
    model.insert_place(Place {
        id: "p1".into(),
        name: "Team".into(),
        creators: vec!["alice".into()],
        key_holders: vec!["bob".into()],
    });
    model.insert_place(Place {
        id: "p2".into(),
        name: "Private".into(),
        creators: vec!["carol".into()],
        key_holders: vec![],
    });
    Arc::new(model)
}

/// Bus that records publishes and never delivers.
#[derive(Default)]
pub struct RecordingBus {
    published: Mutex<Vec<BusMessage>>,
    flushes: AtomicUsize,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<BusMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Decode every payload published on `subject`.
    pub fn decode<T: DeserializeOwned>(&self, subject: &str) -> Vec<T> {
        self.published()
            .into_iter()
            .filter(|m| m.subject == subject)
            .map(|m| serde_json::from_slice(&m.payload).unwrap())
            .collect()
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.published.lock().unwrap().push(BusMessage {
            subject: subject.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, _subject: &str) -> Result<BusStream> {
        Ok(futures::stream::pending().boxed())
    }

    async fn queue_subscribe(&self, _subject: &str, _group: &str) -> Result<BusStream> {
        Ok(futures::stream::pending().boxed())
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
