//! Bounded publish queue drained by a fixed pool of workers.

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use metrics::{counter, gauge};
use nats_client::MessageBus;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One pending bus publish.
#[derive(Debug, Clone)]
pub struct PushJob {
    pub subject: &'static str,
    pub payload: Bytes,
    /// Metric label, e.g. `internal` or `external`.
    pub class: &'static str,
}

pub struct PushQueue {
    tx: ArcSwapOption<mpsc::Sender<PushJob>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    bus: Arc<dyn MessageBus>,
}

impl PushQueue {
    /// Spawn `workers` publishers sharing a queue of `capacity` jobs.
    pub fn start(bus: Arc<dyn MessageBus>, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<PushJob>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers)
            .map(|worker_id| {
                let rx = rx.clone();
                let bus = bus.clone();
                tokio::spawn(async move {
                    run_worker(worker_id, rx, bus).await;
                })
            })
            .collect();

        info!("Push queue started with {} workers, capacity {}", workers, capacity);
        Self {
            tx: ArcSwapOption::from_pointee(tx),
            workers: Mutex::new(handles),
            bus,
        }
    }

    /// Queue a publish. Returns `false` if the job was dropped because the
    /// queue is full or shut down.
    pub fn enqueue(&self, job: PushJob) -> bool {
        let guard = self.tx.load();
        let Some(tx) = guard.as_ref() else {
            warn!("Push queue is shut down, dropping {} message", job.subject);
            counter!("gateway_push_dropped_total").increment(1);
            return false;
        };
        match tx.try_send(job) {
            Ok(()) => {
                gauge!("gateway_push_queue_depth").set((tx.max_capacity() - tx.capacity()) as f64);
                true
            }
            Err(e) => {
                warn!("Push queue full, dropping {} message", e.into_inner().subject);
                counter!("gateway_push_dropped_total").increment(1);
                false
            }
        }
    }

    /// Stop accepting jobs, publish everything already queued, wait for
    /// the workers to exit and flush the bus.
    pub async fn shutdown(&self) {
        self.tx.store(None);
        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        if let Err(e) = self.bus.flush().await {
            warn!("Failed to flush bus after draining push queue: {:?}", e);
        }
        info!("Push queue drained");
    }
}

async fn run_worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<PushJob>>>,
    bus: Arc<dyn MessageBus>,
) {
    loop {
        // Hold the lock only while waiting, never while publishing.
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            debug!("Push worker {} exiting", worker_id);
            break;
        };

        match bus.publish(job.subject, job.payload).await {
            Ok(()) => {
                counter!("gateway_push_published_total", "class" => job.class).increment(1);
            }
            Err(e) => {
                warn!("Failed to publish {}: {:?}", job.subject, e);
                counter!("gateway_push_dropped_total").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingBus;
    use async_trait::async_trait;
    use futures::StreamExt;
    use nats_client::BusStream;
    use tokio::sync::Notify;

    fn job(n: u8) -> PushJob {
        PushJob {
            subject: "NTFY.PUSH.INTERNAL",
            payload: Bytes::from(vec![n]),
            class: "internal",
        }
    }

    /// Bus whose publishes never complete.
    #[derive(Default)]
    struct StalledBus {
        started: Notify,
    }

    #[async_trait]
    impl MessageBus for StalledBus {
        async fn publish(&self, _subject: &str, _payload: Bytes) -> anyhow::Result<()> {
            self.started.notify_one();
            futures::future::pending().await
        }

        async fn subscribe(&self, _subject: &str) -> anyhow::Result<BusStream> {
            Ok(futures::stream::pending().boxed())
        }

        async fn queue_subscribe(&self, _subject: &str, _group: &str) -> anyhow::Result<BusStream> {
            Ok(futures::stream::pending().boxed())
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_jobs() {
        let bus = Arc::new(RecordingBus::new());
        let queue = PushQueue::start(bus.clone(), 3, 64);

        for n in 0..20 {
            assert!(queue.enqueue(job(n)));
        }
        queue.shutdown().await;

        assert_eq!(bus.published().len(), 20);
        assert_eq!(bus.flushes(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let bus = Arc::new(StalledBus::default());
        let queue = PushQueue::start(bus.clone(), 1, 2);

        // The only worker takes the first job and stays stuck publishing it.
        assert!(queue.enqueue(job(1)));
        bus.started.notified().await;

        assert!(queue.enqueue(job(2)));
        assert!(queue.enqueue(job(3)));
        assert!(!queue.enqueue(job(4)));
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_drops() {
        let bus = Arc::new(RecordingBus::new());
        let queue = PushQueue::start(bus.clone(), 1, 8);
        queue.shutdown().await;

        assert!(!queue.enqueue(job(1)));
        assert!(bus.published().is_empty());
    }
}
