//! Overdue task sweep.

use super::Job;
use crate::error::Result;
use crate::model::{Model, NewNotification, NotificationKind, Task, TaskStatus};
use crate::push::PushManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub buckets: usize,
    pub overdue: usize,
    pub skipped: usize,
}

pub struct OverdueJob {
    model: Arc<dyn Model>,
    push: Arc<PushManager>,
}

impl OverdueJob {
    pub fn new(model: Arc<dyn Model>, push: Arc<PushManager>) -> Self {
        Self { model, push }
    }

    /// Move every non-terminal task of each due bucket to overdue. Buckets
    /// are removed after one pass whatever happened to their tasks.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        for bucket in self.model.due_task_buckets(now).await? {
            stats.buckets += 1;
            for task_id in &bucket.task_ids {
                match self.model.get_task(task_id).await {
                    Ok(Some(task)) if task.status.is_terminal() || task.status == TaskStatus::Overdue => {
                        stats.skipped += 1;
                    }
                    Ok(Some(task)) => match self.mark_overdue(task).await {
                        Ok(()) => stats.overdue += 1,
                        Err(e) => warn!("Failed to mark task {} overdue: {:?}", task_id, e),
                    },
                    Ok(None) => {
                        debug!("Task {} in bucket no longer exists", task_id);
                        stats.skipped += 1;
                    }
                    Err(e) => warn!("Failed to load task {}: {:?}", task_id, e),
                }
            }
            if let Err(e) = self.model.remove_task_bucket(bucket.due_at).await {
                warn!("Failed to remove task bucket {}: {:?}", bucket.due_at, e);
            }
        }
        if stats.buckets > 0 {
            info!(
                "Overdue sweep: {} buckets, {} overdue, {} skipped",
                stats.buckets, stats.overdue, stats.skipped
            );
        }
        Ok(stats)
    }

    async fn mark_overdue(&self, mut task: Task) -> Result<()> {
        self.model.set_task_status(&task.id, TaskStatus::Overdue).await?;
        task.status = TaskStatus::Overdue;

        let mut recipients = vec![(task.assignor_id.clone(), task.assignee_id.clone())];
        if let Some(assignee) = &task.assignee_id {
            if assignee != &task.assignor_id {
                recipients.push((assignee.clone(), Some(task.assignor_id.clone())));
            }
        }

        for (account_id, counterpart) in recipients {
            let notification = self
                .model
                .add_notification(NewNotification {
                    kind: NotificationKind::TaskOverdue,
                    actor_id: counterpart.unwrap_or_else(|| account_id.clone()),
                    account_id,
                    place_id: None,
                    post_id: None,
                    task_id: Some(task.id.clone()),
                    text: task.title.clone(),
                })
                .await?;
            self.push.notify(&notification).await;
        }
        self.push.task_activity(&task, "overdue");
        Ok(())
    }
}

#[async_trait]
impl Job for OverdueJob {
    fn name(&self) -> &'static str {
        "overdue"
    }

    async fn run(&self) -> Result<()> {
        self.sweep(Utc::now()).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryModel;
    use crate::push::PushQueue;
    use crate::reports::Reporter;
    use crate::testing::{seeded_model, RecordingBus};
    use chrono::Duration;
    use common::messages::{PushExternal, SUBJECT_PUSH_EXTERNAL};

    fn task(id: &str, assignor: &str, assignee: Option<&str>, status: TaskStatus, due_at: DateTime<Utc>) -> Task {
        Task {
            id: id.into(),
            title: format!("task {id}"),
            assignor_id: assignor.into(),
            assignee_id: assignee.map(Into::into),
            status,
            due_at,
        }
    }

    fn job(model: Arc<MemoryModel>, bus: Arc<RecordingBus>) -> (OverdueJob, Arc<PushManager>) {
        let push = Arc::new(PushManager::new(
            PushQueue::start(bus, 1, 64),
            model.clone(),
            Arc::new(Reporter::new()),
        ));
        (OverdueJob::new(model, push.clone()), push)
    }

    #[tokio::test]
    async fn test_completed_task_skipped_bucket_removed() {
        let model = seeded_model();
        let bus = Arc::new(RecordingBus::new());
        let now = Utc::now();
        let due = now - Duration::minutes(5);
        model.insert_task(task("t1", "carol", None, TaskStatus::Completed, due));
        model.insert_task(task("t2", "alice", Some("bob"), TaskStatus::Assigned, due));
        let (job, push) = job(model.clone(), bus.clone());

        let stats = job.sweep(now).await.unwrap();
        push.shutdown().await;

        assert_eq!(stats, SweepStats { buckets: 1, overdue: 1, skipped: 1 });
        assert_eq!(model.task("t1").unwrap().status, TaskStatus::Completed);
        assert_eq!(model.task("t2").unwrap().status, TaskStatus::Overdue);
        assert_eq!(model.bucket_count(), 0);

        assert!(model.notifications_for("carol").is_empty());
        assert_eq!(model.notifications_for("alice").len(), 1);
        assert_eq!(model.notifications_for("bob").len(), 1);

        let external: Vec<PushExternal> = bus.decode(SUBJECT_PUSH_EXTERNAL);
        assert_eq!(external.len(), 2);
    }

    #[tokio::test]
    async fn test_future_buckets_untouched() {
        let model = seeded_model();
        let now = Utc::now();
        model.insert_task(task("t1", "alice", None, TaskStatus::Assigned, now + Duration::hours(1)));
        let (job, _push) = job(model.clone(), Arc::new(RecordingBus::new()));

        let stats = job.sweep(now).await.unwrap();
        assert_eq!(stats.buckets, 0);
        assert_eq!(model.bucket_count(), 1);
        assert_eq!(model.task("t1").unwrap().status, TaskStatus::Assigned);
    }

    #[tokio::test]
    async fn test_only_terminal_tasks_still_removes_bucket() {
        let model = seeded_model();
        let now = Utc::now();
        model.insert_task(task("t1", "alice", Some("bob"), TaskStatus::Canceled, now - Duration::seconds(1)));
        let (job, push) = job(model.clone(), Arc::new(RecordingBus::new()));

        let stats = job.sweep(now).await.unwrap();
        push.shutdown().await;
        assert_eq!(stats.overdue, 0);
        assert_eq!(model.bucket_count(), 0);
        assert_eq!(model.notification_count(), 0);
    }
}
