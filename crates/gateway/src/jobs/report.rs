//! Report flush.

use super::Job;
use crate::error::Result;
use crate::flags::FlagStore;
use crate::model::{Model, SystemInfo};
use crate::registry::ConnectionRegistry;
use crate::reports::Reporter;
use async_trait::async_trait;
use chrono::Utc;
use metrics::gauge;
use std::sync::Arc;
use tracing::debug;

/// Drains the in-memory counters into the model and stores a system info
/// snapshot for this bundle.
pub struct ReportJob {
    model: Arc<dyn Model>,
    reporter: Arc<Reporter>,
    registry: Arc<ConnectionRegistry>,
    flags: Arc<FlagStore>,
}

impl ReportJob {
    pub fn new(
        model: Arc<dyn Model>,
        reporter: Arc<Reporter>,
        registry: Arc<ConnectionRegistry>,
        flags: Arc<FlagStore>,
    ) -> Self {
        Self {
            model,
            reporter,
            registry,
            flags,
        }
    }

    async fn flush_counters(&self) -> Result<()> {
        let counters = self.reporter.drain();
        if counters.is_empty() {
            return Ok(());
        }
        debug!("Flushing {} report counters", counters.len());
        if let Err(e) = self.model.flush_report(counters.clone()).await {
            // Keep the counts for the next tick.
            self.reporter.restore(counters);
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl Job for ReportJob {
    fn name(&self) -> &'static str {
        "report"
    }

    async fn run(&self) -> Result<()> {
        let flushed = self.flush_counters().await;

        let connections = self.registry.connection_count();
        gauge!("gateway_active_connections").set(connections as f64);
        let flags = self.flags.load();
        self.model
            .set_system_info(SystemInfo {
                bundle_id: self.registry.bundle_id().to_string(),
                connections,
                license_expired: flags.license_expired,
                license_slow_mode: flags.license_slow_mode,
                reported_at: Utc::now(),
            })
            .await?;

        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryModel;
    use crate::reports::REQUESTS_OK;

    #[tokio::test]
    async fn test_flush_moves_counters() {
        let model = Arc::new(MemoryModel::new());
        let reporter = Arc::new(Reporter::new());
        let registry = Arc::new(ConnectionRegistry::new("b1"));
        let job = ReportJob::new(model.clone(), reporter.clone(), registry, Arc::new(FlagStore::new()));

        reporter.add(REQUESTS_OK, 5);
        job.run().await.unwrap();
        assert_eq!(model.report_total(REQUESTS_OK), 5);
        assert_eq!(reporter.get(REQUESTS_OK), 0);

        // Running again with nothing new changes nothing.
        job.run().await.unwrap();
        assert_eq!(model.report_total(REQUESTS_OK), 5);

        let info = model.system_info("b1").unwrap();
        assert_eq!(info.connections, 0);
        assert!(!info.license_expired);
    }
}
