//! `system/*` commands.

use super::{model_error, parse_args};
use crate::dispatch::{CommandService, CommandTable, Requester};
use crate::flags::FlagStore;
use crate::jobs::license_flags;
use crate::model::{License, Model};
use crate::registry::ConnectionRegistry;
use chrono::{DateTime, Utc};
use common::{AuthLevel, Request, Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
struct SetLicenseArgs {
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
struct HealthCheckArgs {
    /// Explicit state; toggles when absent.
    #[serde(default)]
    running: Option<bool>,
}

pub struct SystemService {
    model: Arc<dyn Model>,
    flags: Arc<FlagStore>,
    registry: Arc<ConnectionRegistry>,
    table: CommandTable<Self>,
}

impl SystemService {
    pub fn new(model: Arc<dyn Model>, flags: Arc<FlagStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            model,
            flags,
            registry,
            table: CommandTable::<Self>::new()
                .with("system/set_license", AuthLevel::AdminUser, |s, who, req, res| {
                    Box::pin(s.set_license(who, req, res))
                })
                .with("system/health_check", AuthLevel::AdminUser, |s, _, req, res| {
                    Box::pin(s.health_check(req, res))
                })
                .with("system/get_info", AuthLevel::AppLevel3, |s, _, _, res| {
                    Box::pin(s.get_info(res))
                }),
        }
    }

    /// Store a new license and apply its flags right away.
    async fn set_license(&self, requester: &Requester, request: &Request, response: &mut Response) {
        let Some(args) = parse_args::<SetLicenseArgs>(request, response) else {
            return;
        };
        let license = License {
            expires_at: args.expires_at,
        };
        if let Err(e) = self.model.set_license(license).await {
            return model_error(response, &request.command, e);
        }
        let state = license_flags(Utc::now(), Some(&license));
        self.flags.set_license(state.expired, state.slow_mode);
        info!(
            "License set to expire at {} by {:?}",
            license.expires_at,
            requester.account_id()
        );
        response.ok(json!({
            "license_expired": state.expired,
            "license_slow_mode": state.slow_mode,
        }));
    }

    async fn health_check(&self, request: &Request, response: &mut Response) {
        let Some(args) = parse_args::<HealthCheckArgs>(request, response) else {
            return;
        };
        let running = self.flags.set_health_check_running(args.running);
        response.ok(json!({"health_check_running": running}));
    }

    async fn get_info(&self, response: &mut Response) {
        let flags = self.flags.load();
        response.ok(json!({
            "bundle_id": self.registry.bundle_id(),
            "connections": self.registry.connection_count(),
            "bound_connections": self.registry.bound_count(),
            "flags": *flags,
        }));
    }
}

impl CommandService for SystemService {
    const PREFIX: &'static str = "system";

    fn commands(&self) -> &CommandTable<Self> {
        &self.table
    }
}
