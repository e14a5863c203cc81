//! `notification/*` commands.

use super::model_error;
use crate::dispatch::{CommandService, CommandTable, Requester};
use crate::model::Model;
use crate::push::PushManager;
use common::{AuthLevel, Request, Response};
use serde_json::json;
use std::sync::Arc;

pub struct NotificationService {
    model: Arc<dyn Model>,
    push: Arc<PushManager>,
    table: CommandTable<Self>,
}

impl NotificationService {
    pub fn new(model: Arc<dyn Model>, push: Arc<PushManager>) -> Self {
        Self {
            model,
            push,
            table: CommandTable::<Self>::new()
                .with("notification/get_counter", AuthLevel::User, |s, who, req, res| {
                    Box::pin(s.get_counter(who, req, res))
                })
                .with("notification/reset_counter", AuthLevel::User, |s, who, req, res| {
                    Box::pin(s.reset_counter(who, req, res))
                }),
        }
    }

    async fn get_counter(&self, requester: &Requester, request: &Request, response: &mut Response) {
        let Some(account_id) = requester.account_id() else {
            response.not_authorized();
            return;
        };
        match self.model.unread_count(account_id).await {
            Ok(count) => response.ok(json!({"unread": count})),
            Err(e) => model_error(response, &request.command, e),
        }
    }

    /// Zero the unread counter and sync the caller's other devices.
    async fn reset_counter(&self, requester: &Requester, request: &Request, response: &mut Response) {
        let Some(account_id) = requester.account_id() else {
            response.not_authorized();
            return;
        };
        if let Err(e) = self.model.reset_unread(account_id).await {
            return model_error(response, &request.command, e);
        }
        self.push.notification_count(account_id, 0);
        response.ok(json!({}));
    }
}

impl CommandService for NotificationService {
    const PREFIX: &'static str = "notification";

    fn commands(&self) -> &CommandTable<Self> {
        &self.table
    }
}
