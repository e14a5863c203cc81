//! Periodic background jobs.
//!
//! Each job runs on its own task. A tick never overlaps the previous one:
//! the loop only waits for the next tick after the job returns. Shutdown is
//! checked before every tick and waits for a running tick to finish.

pub mod license;
pub mod overdue;
pub mod report;

pub use license::{license_flags, LicenseJob, LicenseState};
pub use overdue::OverdueJob;
pub use report::ReportJob;

use crate::error::Result;
use async_trait::async_trait;
use futures::future::join_all;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const REPORT_PERIOD: Duration = Duration::from_secs(60);
pub const OVERDUE_PERIOD: Duration = Duration::from_secs(60);
pub const LICENSE_PERIOD: Duration = Duration::from_secs(3600);

#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<()>;
}

/// Handle to a scheduled job.
pub struct BackgroundJob {
    name: &'static str,
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl BackgroundJob {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the loop to stop after the run in progress, if any.
    pub fn signal(&self) {
        let _ = self.shutdown_tx.try_send(());
    }

    /// Wait for the loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!("Job {} task failed: {:?}", self.name, e);
        }
        info!("Job {} stopped", self.name);
    }

    /// Stop the job and wait for its loop to exit.
    pub async fn shutdown(self) {
        self.signal();
        self.join().await;
    }
}

/// Run `job` every `period`, first one period from now.
pub fn schedule(period: Duration, job: Arc<dyn Job>) -> BackgroundJob {
    let name = job.name();
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let handle = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => break,

                _ = ticker.tick() => {
                    debug!("Running job {}", name);
                    counter!("gateway_job_runs_total", "job" => name).increment(1);
                    if let Err(e) = job.run().await {
                        warn!("Job {} failed: {:?}", name, e);
                    }
                }
            }
        }
    });

    info!("Scheduled job {} every {:?}", name, period);
    BackgroundJob {
        name,
        shutdown_tx,
        handle,
    }
}

/// Owns every scheduled job of the process.
#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<BackgroundJob>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, period: Duration, job: Arc<dyn Job>) {
        self.jobs.push(schedule(period, job));
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Signal every job, then wait for all of them.
    pub async fn shutdown(self) {
        for job in &self.jobs {
            job.signal();
        }
        join_all(self.jobs.into_iter().map(BackgroundJob::join)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingJob {
        runs: AtomicUsize,
        at: Mutex<Vec<Instant>>,
        fail: bool,
    }

    impl CountingJob {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                at: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.at.lock().unwrap().push(Instant::now());
            if self.fail {
                return Err(GatewayError::Model("boom".into()));
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_once_per_period() {
        let job = CountingJob::new(false);
        let start = Instant::now();
        let handle = schedule(Duration::from_secs(60), job.clone());

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(job.runs(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(job.runs(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(job.runs(), 2);

        let at = job.at.lock().unwrap().clone();
        assert!(at[0] >= start + Duration::from_secs(60));
        assert!(at[1] >= at[0] + Duration::from_secs(60));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_run_after_shutdown() {
        let job = CountingJob::new(false);
        let handle = schedule(Duration::from_secs(10), job.clone());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(job.runs(), 1);

        handle.shutdown().await;
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(job.runs(), 1);
    }

    struct SlowJob;

    #[async_trait]
    impl Job for SlowJob {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn run(&self) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(100)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_every_job_before_waiting() {
        let fast = CountingJob::new(false);
        let mut scheduler = Scheduler::new();
        scheduler.schedule(Duration::from_secs(10), Arc::new(SlowJob));
        scheduler.schedule(Duration::from_secs(1), fast.clone());

        // The slow job is in the middle of a run.
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        let runs = fast.runs();
        assert_eq!(runs, 10);

        let start = Instant::now();
        scheduler.shutdown().await;
        assert!(Instant::now() >= start + Duration::from_secs(99));
        assert_eq!(fast.runs(), runs);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_the_loop() {
        let job = CountingJob::new(true);
        let mut scheduler = Scheduler::new();
        scheduler.schedule(Duration::from_secs(5), job.clone());

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(job.runs(), 3);

        scheduler.shutdown().await;
    }
}
