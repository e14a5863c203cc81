//! Push manager.
//!
//! Builds internal sync pushes (small discriminators telling connected
//! clients to re-fetch) and external pushes (human-readable notifications
//! for offline devices) and hands them to the [`PushQueue`]. Everything here
//! is fire-and-forget: failures are logged and counted, never returned.

pub mod events;
pub mod queue;

pub use queue::{PushJob, PushQueue};

use crate::model::{Model, Notification, Place, Post, Task};
use crate::reports::{self, Reporter};
use common::messages::{
    PushExternal, PushInternal, RegisterDevice, RegisterWebsocket, UnregisterDevice,
    UnregisterWebsocket,
};
use common::{PushCommand, PushMessage, MAX_RESULT_LIMIT};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

pub const SYNC_PLACE: &str = "sync-p";
pub const SYNC_TASK: &str = "sync-t";
pub const SYNC_NOTIFICATION: &str = "sync-n";

/// Deduplicate `targets` (first occurrence wins) and split them into
/// consecutive chunks of at most `size`.
pub fn chunk_targets(targets: &[String], size: usize) -> Vec<Vec<String>> {
    let mut seen = HashSet::with_capacity(targets.len());
    let mut unique = Vec::with_capacity(targets.len());
    for target in targets {
        if seen.insert(target.as_str()) {
            unique.push(target.clone());
        }
    }
    unique.chunks(size.max(1)).map(<[String]>::to_vec).collect()
}

pub struct PushManager {
    queue: PushQueue,
    model: Arc<dyn Model>,
    reporter: Arc<Reporter>,
    chunk_size: usize,
}

impl PushManager {
    pub fn new(queue: PushQueue, model: Arc<dyn Model>, reporter: Arc<Reporter>) -> Self {
        Self {
            queue,
            model,
            reporter,
            chunk_size: MAX_RESULT_LIMIT,
        }
    }

    /// Override the fan-out chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn publish(&self, command: PushCommand, class: &'static str) {
        let payload = match command.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode {} push: {:?}", command.subject(), e);
                return;
            }
        };
        let job = PushJob {
            subject: command.subject(),
            payload,
            class,
        };
        if self.queue.enqueue(job) {
            self.reporter.incr(reports::PUSHES_SENT);
        }
    }

    // =========================================================================
    // Fan-out
    // =========================================================================

    /// Internal sync push to `targets`, one bus message per chunk.
    pub fn internal(&self, targets: &[String], message: &PushMessage, local_only: bool) {
        let message = match message.to_json() {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to encode {} push message: {:?}", message.cmd, e);
                return;
            }
        };
        for chunk in chunk_targets(targets, self.chunk_size) {
            self.publish(
                PushCommand::PushInternal(PushInternal {
                    targets: chunk,
                    message: message.clone(),
                    local_only,
                }),
                "internal",
            );
        }
    }

    /// External push to `targets`, one bus message per chunk.
    pub fn external(&self, targets: &[String], data: HashMap<String, String>) {
        for chunk in chunk_targets(targets, self.chunk_size) {
            self.publish(
                PushCommand::PushExternal(PushExternal {
                    targets: chunk,
                    data: data.clone(),
                }),
                "external",
            );
        }
    }

    // =========================================================================
    // Sync signals
    // =========================================================================

    pub fn place_activity(&self, place: &Place, action: &str) {
        let message = PushMessage::new(
            SYNC_PLACE,
            json!({"place_id": place.id, "action": action}),
        );
        self.internal(&place.members(), &message, false);
    }

    /// Sync a new post to the members of its places: one push per distinct
    /// member set.
    pub fn post_added(&self, post: &Post, places: &[Place]) {
        let mut by_members: BTreeMap<Vec<String>, Vec<&str>> = BTreeMap::new();
        for place in places {
            let mut members = place.members();
            members.sort();
            by_members.entry(members).or_default().push(place.id.as_str());
        }

        for (members, place_ids) in by_members {
            let message = PushMessage::new(
                SYNC_PLACE,
                json!({
                    "action": "post_added",
                    "post_id": post.id,
                    "sender_id": post.sender_id,
                    "place_ids": place_ids,
                }),
            );
            self.internal(&members, &message, false);
        }
    }

    /// Sync a task change to its assignor and assignee.
    pub fn task_activity(&self, task: &Task, action: &str) {
        let mut targets = vec![task.assignor_id.clone()];
        if let Some(assignee) = &task.assignee_id {
            targets.push(assignee.clone());
        }
        let message = PushMessage::new(SYNC_TASK, json!({"task_id": task.id, "action": action}));
        self.internal(&targets, &message, false);
    }

    pub fn notification_count(&self, account_id: &str, count: u64) {
        let message = PushMessage::new(SYNC_NOTIFICATION, json!({"unread": count}));
        self.internal(&[account_id.to_string()], &message, false);
    }

    /// External push for a recorded notification followed by an unread
    /// count sync. Kinds without a template are skipped entirely.
    pub async fn notify(&self, notification: &Notification) {
        let actor = match self.model.get_account(&notification.actor_id).await {
            Ok(Some(actor)) => actor,
            Ok(None) => {
                debug!("Notification actor {} not found", notification.actor_id);
                return;
            }
            Err(e) => {
                warn!("Failed to load notification actor: {:?}", e);
                return;
            }
        };
        let Some(data) = events::external_payload(notification, &actor) else {
            debug!("No push template for {:?}, skipping", notification.kind);
            return;
        };
        self.external(&[notification.account_id.clone()], data);

        match self.model.unread_count(&notification.account_id).await {
            Ok(count) => self.notification_count(&notification.account_id, count),
            Err(e) => warn!("Failed to load unread count: {:?}", e),
        }
    }

    // =========================================================================
    // Registrations
    // =========================================================================

    pub fn register_websocket(&self, registration: RegisterWebsocket) {
        self.publish(PushCommand::RegisterWebsocket(registration), "registration");
    }

    pub fn unregister_websocket(&self, websocket_id: &str, bundle_id: &str) {
        self.publish(
            PushCommand::UnregisterWebsocket(UnregisterWebsocket {
                websocket_id: websocket_id.to_string(),
                bundle_id: bundle_id.to_string(),
            }),
            "registration",
        );
    }

    pub fn register_device(&self, registration: RegisterDevice) {
        self.publish(PushCommand::RegisterDevice(registration), "registration");
    }

    pub fn unregister_device(&self, registration: UnregisterDevice) {
        self.publish(PushCommand::UnregisterDevice(registration), "registration");
    }

    /// Drain pending pushes.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}
