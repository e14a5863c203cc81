//! The command dispatcher.

use crate::dispatch::auth::{AuthResolver, Requester};
use crate::dispatch::service::Service;
use crate::error::{GatewayError, Result};
use crate::flags::FlagStore;
use crate::model::Model;
use crate::reports::{self, Reporter};
use common::{AuthLevel, ErrorCode, Request, Response};
use futures::FutureExt;
use metrics::counter;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Delay added to non-admin requests for each slow-mode tier.
const SLOW_MODE_DELAYS: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_secs(1),
    Duration::from_secs(2),
];

pub struct WorkerBuilder {
    services: HashMap<&'static str, Arc<dyn Service>>,
    model: Arc<dyn Model>,
    flags: Arc<FlagStore>,
    reporter: Arc<Reporter>,
}

impl WorkerBuilder {
    /// Register a service under its prefix. Prefixes must be unique.
    pub fn register(mut self, service: Arc<dyn Service>) -> Result<Self> {
        let prefix = service.prefix();
        if self.services.contains_key(prefix) {
            return Err(GatewayError::DuplicateService(prefix.to_string()));
        }
        debug!("Registered service {}", prefix);
        self.services.insert(prefix, service);
        Ok(self)
    }

    pub fn build(self) -> Worker {
        Worker {
            services: self.services,
            auth: AuthResolver::new(self.model),
            flags: self.flags,
            reporter: self.reporter,
        }
    }
}

/// Routes requests to services and enforces authorization.
pub struct Worker {
    services: HashMap<&'static str, Arc<dyn Service>>,
    auth: AuthResolver,
    flags: Arc<FlagStore>,
    reporter: Arc<Reporter>,
}

impl Worker {
    pub fn builder(model: Arc<dyn Model>, flags: Arc<FlagStore>, reporter: Arc<Reporter>) -> WorkerBuilder {
        WorkerBuilder {
            services: HashMap::new(),
            model,
            flags,
            reporter,
        }
    }

    pub fn has_service(&self, prefix: &str) -> bool {
        self.services.contains_key(prefix)
    }

    /// Execute one request and return its response.
    ///
    /// Never fails: every outcome, including a panicking handler, is encoded
    /// in the response.
    pub async fn execute(&self, request: &Request) -> Response {
        let mut response = Response::new(request.request_id.clone());

        let service = match request.service_prefix().and_then(|p| self.services.get(p)) {
            Some(service) => service,
            None => {
                debug!("No service for command {:?}", request.command);
                response.not_implemented();
                self.record(&response);
                return response;
            }
        };

        let min_level = match service.min_auth_level(&request.command) {
            Some(level) => level,
            None => {
                debug!("Service {} has no command {:?}", service.prefix(), request.command);
                response.not_implemented();
                self.record(&response);
                return response;
            }
        };

        let requester = self.auth.resolve(request).await;
        if requester.level < min_level {
            debug!(
                "Rejected {}: requires {}, caller is {}",
                request.command,
                min_level.as_str(),
                requester.level.as_str()
            );
            response.not_authorized();
            self.record(&response);
            return response;
        }

        self.throttle(&requester).await;

        let outcome = AssertUnwindSafe(service.execute(
            &request.command,
            &requester,
            request,
            &mut response,
        ))
        .catch_unwind()
        .await;

        if outcome.is_err() {
            error!("Handler for {} panicked", request.command);
            response = Response::new(request.request_id.clone());
            response.error(ErrorCode::Unknown, &[]);
        } else if !response.is_initialized() {
            error!("Handler for {} returned without a status", request.command);
            response.not_initialized();
        }

        self.record(&response);
        response
    }

    /// Slow down callers while the license is expired.
    async fn throttle(&self, requester: &Requester) {
        if requester.level >= AuthLevel::AdminUser {
            return;
        }
        let flags = self.flags.load();
        if !flags.license_expired {
            return;
        }
        if let Some(tier) = flags.license_slow_mode {
            let delay = SLOW_MODE_DELAYS[usize::from(tier).min(SLOW_MODE_DELAYS.len() - 1)];
            warn!("License expired, delaying request by {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    fn record(&self, response: &Response) {
        let (outcome, key) = if response.is_ok() {
            ("ok", reports::REQUESTS_OK)
        } else if response.is_not_authorized() {
            ("not_authorized", reports::REQUESTS_NOT_AUTHORIZED)
        } else if response.is_not_implemented() {
            ("not_implemented", reports::REQUESTS_NOT_IMPLEMENTED)
        } else {
            ("err", reports::REQUESTS_ERR)
        };
        counter!("gateway_requests_total", "outcome" => outcome).increment(1);
        self.reporter.incr(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::service::{CommandService, CommandTable};
    use crate::testing::{seeded_model, ADMIN_SESSION, ALICE_SESSION};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingService {
        calls: AtomicUsize,
        table: CommandTable<Self>,
    }

    impl CountingService {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                table: CommandTable::<Self>::new()
                    .with("echo/open", AuthLevel::Unauthorized, |s, _, _, res| Box::pin(s.answer(res)))
                    .with("echo/user", AuthLevel::User, |s, _, _, res| Box::pin(s.answer(res)))
                    .with("echo/admin", AuthLevel::AdminUser, |s, _, _, res| Box::pin(s.answer(res)))
                    .with("echo/panic", AuthLevel::Unauthorized, |_, _, _, _| {
                        Box::pin(async { panic!("handler bug") })
                    })
                    .with("echo/silent", AuthLevel::Unauthorized, |_, _, _, _| Box::pin(async {})),
            }
        }

        async fn answer(&self, response: &mut Response) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            response.ok(json!({"pong": true}));
        }
    }

    impl CommandService for CountingService {
        const PREFIX: &'static str = "echo";

        fn commands(&self) -> &CommandTable<Self> {
            &self.table
        }
    }

    fn worker_with(service: Arc<CountingService>, flags: Arc<FlagStore>) -> (Worker, Arc<Reporter>) {
        let reporter = Arc::new(Reporter::new());
        let worker = Worker::builder(seeded_model(), flags, reporter.clone())
            .register(service)
            .unwrap()
            .build();
        (worker, reporter)
    }

    fn request(command: &str, session: Option<(&str, &str)>) -> Request {
        let mut req = Request::new(command, json!({}));
        req.request_id = json!(7);
        if let Some((key, secret)) = session {
            req.session_key = key.into();
            req.session_secret = secret.into();
        }
        req
    }

    #[tokio::test]
    async fn test_dispatch_ok_echoes_request_id() {
        let service = Arc::new(CountingService::new());
        let (worker, reporter) = worker_with(service.clone(), Arc::new(FlagStore::new()));

        let res = worker.execute(&request("echo/open", None)).await;
        assert!(res.is_ok());
        assert_eq!(res.request_id, json!(7));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert_eq!(reporter.get(reports::REQUESTS_OK), 1);
    }

    #[tokio::test]
    async fn test_insufficient_level_never_runs_handler() {
        let service = Arc::new(CountingService::new());
        let (worker, reporter) = worker_with(service.clone(), Arc::new(FlagStore::new()));

        let res = worker.execute(&request("echo/user", None)).await;
        assert!(res.is_not_authorized());
        let res = worker.execute(&request("echo/admin", Some(ALICE_SESSION))).await;
        assert!(res.is_not_authorized());

        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
        assert_eq!(reporter.get(reports::REQUESTS_NOT_AUTHORIZED), 2);
    }

    #[tokio::test]
    async fn test_sufficient_level_runs_handler() {
        let service = Arc::new(CountingService::new());
        let (worker, _) = worker_with(service.clone(), Arc::new(FlagStore::new()));

        assert!(worker.execute(&request("echo/user", Some(ALICE_SESSION))).await.is_ok());
        assert!(worker.execute(&request("echo/admin", Some(ADMIN_SESSION))).await.is_ok());
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_command_not_implemented_for_admin() {
        let service = Arc::new(CountingService::new());
        let (worker, _) = worker_with(service, Arc::new(FlagStore::new()));

        let res = worker.execute(&request("echo/missing", Some(ADMIN_SESSION))).await;
        assert!(res.is_not_implemented());
        let res = worker.execute(&request("nothing/here", Some(ADMIN_SESSION))).await;
        assert!(res.is_not_implemented());
    }

    #[tokio::test]
    async fn test_malformed_command_not_implemented() {
        let service = Arc::new(CountingService::new());
        let (worker, _) = worker_with(service.clone(), Arc::new(FlagStore::new()));

        for command in ["echo", "echo/open/extra", "/open", "echo/", ""] {
            let res = worker.execute(&request(command, None)).await;
            assert!(res.is_not_implemented(), "{command:?}");
        }
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_handler_yields_unknown() {
        let service = Arc::new(CountingService::new());
        let (worker, _) = worker_with(service, Arc::new(FlagStore::new()));

        let res = worker.execute(&request("echo/panic", None)).await;
        assert!(!res.is_ok());
        assert_eq!(res.error_code(), Some(ErrorCode::Unknown));
        assert_eq!(res.request_id, json!(7));
    }

    #[tokio::test]
    async fn test_silent_handler_not_initialized() {
        let service = Arc::new(CountingService::new());
        let (worker, _) = worker_with(service, Arc::new(FlagStore::new()));

        let res = worker.execute(&request("echo/silent", None)).await;
        assert_eq!(res.error_code(), Some(ErrorCode::Unknown));
        assert_eq!(res.error_items(), vec![common::response::ITEM_NOT_INITIALIZED]);
    }

    #[tokio::test]
    async fn test_duplicate_prefix_rejected() {
        let result = Worker::builder(seeded_model(), Arc::new(FlagStore::new()), Arc::new(Reporter::new()))
            .register(Arc::new(CountingService::new()))
            .unwrap()
            .register(Arc::new(CountingService::new()));
        assert!(matches!(result, Err(GatewayError::DuplicateService(p)) if p == "echo"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_mode_delays_users_not_admins() {
        let flags = Arc::new(FlagStore::new());
        flags.set_license(true, Some(2));
        let service = Arc::new(CountingService::new());
        let (worker, _) = worker_with(service, flags);

        let start = tokio::time::Instant::now();
        assert!(worker.execute(&request("echo/open", None)).await.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(2));

        let start = tokio::time::Instant::now();
        assert!(worker.execute(&request("echo/open", Some(ADMIN_SESSION))).await.is_ok());
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
