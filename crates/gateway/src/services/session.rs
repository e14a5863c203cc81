//! `session/*` commands.

use super::{model_error, parse_args};
use crate::dispatch::{CommandService, CommandTable, Requester};
use crate::flags::FlagStore;
use crate::model::Model;
use crate::push::PushManager;
use crate::registry::{Binding, ConnectionRegistry};
use common::messages::RegisterWebsocket;
use common::{AuthLevel, ErrorCode, Request, Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default, Deserialize)]
struct RecallArgs {
    #[serde(default, rename = "_did")]
    device_id: String,
}

pub struct SessionService {
    model: Arc<dyn Model>,
    registry: Arc<ConnectionRegistry>,
    push: Arc<PushManager>,
    flags: Arc<FlagStore>,
    table: CommandTable<Self>,
}

impl SessionService {
    pub fn new(
        model: Arc<dyn Model>,
        registry: Arc<ConnectionRegistry>,
        push: Arc<PushManager>,
        flags: Arc<FlagStore>,
    ) -> Self {
        Self {
            model,
            registry,
            push,
            flags,
            table: CommandTable::<Self>::new()
                .with("session/recall", AuthLevel::User, |s, who, req, res| {
                    Box::pin(s.recall(who, req, res))
                })
                .with("session/close", AuthLevel::User, |s, who, req, res| {
                    Box::pin(s.close(who, req, res))
                })
                .with("session/get_flags", AuthLevel::Unauthorized, |s, _, _, res| {
                    Box::pin(s.get_flags(res))
                }),
        }
    }

    /// Resume a verified session. Over a WebSocket this also binds the
    /// socket to the account and announces it to the cluster.
    async fn recall(&self, requester: &Requester, request: &Request, response: &mut Response) {
        let Some(account) = &requester.account else {
            response.error(ErrorCode::Session, &["_sk"]);
            return;
        };
        let Some(args) = parse_args::<RecallArgs>(request, response) else {
            return;
        };

        if let Some(websocket_id) = &request.websocket_id {
            let binding = Binding {
                account_id: account.id.clone(),
                device_id: args.device_id.clone(),
            };
            let previous = match self.registry.bind(websocket_id, binding) {
                Ok(previous) => previous,
                Err(_) => {
                    debug!("Socket {} closed before session recall", websocket_id);
                    response.error(ErrorCode::Invalid, &["ws_id"]);
                    return;
                }
            };
            // The directory moves the socket away from the previous owner on
            // registration. Pushes may be published out of order, so no
            // separate unregister is sent here.
            if let Some(previous) = previous.filter(|b| b.account_id != account.id) {
                info!(
                    "Websocket {} switched from {} to {}",
                    websocket_id, previous.account_id, account.id
                );
            }
            self.push.register_websocket(RegisterWebsocket {
                user_id: account.id.clone(),
                device_id: args.device_id,
                bundle_id: self.registry.bundle_id().to_string(),
                websocket_id: websocket_id.clone(),
            });
        }

        response.ok(json!({
            "account_id": account.id,
            "name": account.name,
            "picture": account.picture,
            "admin": account.admin,
        }));
    }

    async fn close(&self, requester: &Requester, request: &Request, response: &mut Response) {
        let session = match self.model.get_session(&request.session_key).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                response.error(ErrorCode::Session, &["_sk"]);
                return;
            }
            Err(e) => return model_error(response, &request.command, e),
        };
        if requester.account_id() != Some(session.account_id.as_str()) {
            response.error(ErrorCode::Access, &["_sk"]);
            return;
        }
        if let Err(e) = self.model.close_session(&session.key).await {
            return model_error(response, &request.command, e);
        }

        if let Some(websocket_id) = &request.websocket_id {
            if self.registry.unbind(websocket_id).is_some() {
                self.push
                    .unregister_websocket(websocket_id, self.registry.bundle_id());
            }
        }
        info!("Session of {} closed", session.account_id);
        response.ok(json!({}));
    }

    async fn get_flags(&self, response: &mut Response) {
        response.ok(json!(*self.flags.load()));
    }
}

impl CommandService for SessionService {
    const PREFIX: &'static str = "session";

    fn commands(&self) -> &CommandTable<Self> {
        &self.table
    }
}
