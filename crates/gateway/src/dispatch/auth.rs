//! Caller authentication.
//!
//! Verification failures of any kind degrade to
//! [`AuthLevel::Unauthorized`]; whether that suffices is the dispatcher's
//! call, not the resolver's.

use crate::model::{Account, Model};
use common::{AuthLevel, Request};
use std::sync::Arc;
use tracing::{debug, warn};

/// Who is calling, resolved once per request.
#[derive(Debug, Clone, Default)]
pub struct Requester {
    pub level: AuthLevel,
    pub account: Option<Account>,
}

impl Requester {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account.as_ref().map(|a| a.id.as_str())
    }
}

pub struct AuthResolver {
    model: Arc<dyn Model>,
}

impl AuthResolver {
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self { model }
    }

    /// Derive the caller's level from session or app credentials.
    pub async fn resolve(&self, request: &Request) -> Requester {
        if let Some((key, secret)) = request.session_credentials() {
            match self.model.verify_session(key, secret).await {
                Ok(Some(account)) => {
                    let level = if account.admin {
                        AuthLevel::AdminUser
                    } else {
                        AuthLevel::User
                    };
                    return Requester {
                        level,
                        account: Some(account),
                    };
                }
                Ok(None) => debug!("Session {} did not verify", key),
                Err(e) => warn!("Session verification failed: {:?}", e),
            }
        }

        if let Some((app_id, token)) = request.app_credentials() {
            match self.model.verify_app_token(app_id, token).await {
                Ok(Some(grant)) => {
                    let account = match self.model.get_account(&grant.account_id).await {
                        Ok(account) => account,
                        Err(e) => {
                            warn!("Failed to load account of app {}: {:?}", app_id, e);
                            None
                        }
                    };
                    return Requester {
                        level: AuthLevel::from_app_scope(grant.scope),
                        account,
                    };
                }
                Ok(None) => debug!("App token for {} did not verify", app_id),
                Err(e) => warn!("App token verification failed: {:?}", e),
            }
        }

        Requester::anonymous()
    }
}
