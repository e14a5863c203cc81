//! In-memory [`Model`] backed by DashMap.
//!
//! Used for single-bundle development and as the fake persistence layer in
//! tests. Nothing survives a restart.

use super::*;
use dashmap::DashMap;
use std::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

fn new_id(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::new_v4().simple())
}

#[derive(Default)]
pub struct MemoryModel {
    accounts: DashMap<String, Account>,
    sessions: DashMap<String, Session>,
    /// (app id, token) → grant.
    apps: DashMap<(String, String), AppGrant>,
    places: DashMap<String, Place>,
    posts: DashMap<String, Post>,
    tasks: DashMap<String, Task>,
    /// Deadline in milliseconds → bucket.
    buckets: DashMap<i64, TaskBucket>,
    notifications: DashMap<String, Notification>,
    unread: DashMap<String, u64>,
    license: RwLock<Option<License>>,
    reports: DashMap<String, u64>,
    system_info: DashMap<String, SystemInfo>,
}

impl MemoryModel {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    pub fn insert_account(&self, account: Account) {
        self.accounts.insert(account.id.clone(), account);
    }

    pub fn insert_session(&self, session: Session) {
        self.sessions.insert(session.key.clone(), session);
    }

    pub fn insert_app(&self, grant: AppGrant, token: &str) {
        self.apps
            .insert((grant.app_id.clone(), token.to_string()), grant);
    }

    pub fn insert_place(&self, place: Place) {
        self.places.insert(place.id.clone(), place);
    }

    /// Store a task and index it in the bucket for its deadline.
    pub fn insert_task(&self, task: Task) {
        let key = task.due_at.timestamp_millis();
        self.buckets
            .entry(key)
            .or_insert_with(|| TaskBucket {
                due_at: task.due_at,
                task_ids: Vec::new(),
            })
            .task_ids
            .push(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn post_count(&self) -> usize {
        self.posts.len()
    }

    pub fn notifications_for(&self, account_id: &str) -> Vec<Notification> {
        self.notifications
            .iter()
            .filter(|n| n.account_id == account_id)
            .map(|n| n.clone())
            .collect()
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.len()
    }

    pub fn report_total(&self, key: &str) -> u64 {
        self.reports.get(key).map(|v| *v).unwrap_or(0)
    }

    pub fn system_info(&self, bundle_id: &str) -> Option<SystemInfo> {
        self.system_info.get(bundle_id).map(|i| i.clone())
    }
}

#[async_trait]
impl Model for MemoryModel {
    async fn verify_session(&self, key: &str, secret: &str) -> Result<Option<Account>> {
        let account_id = match self.sessions.get(key) {
            Some(session) if session.secret == secret => session.account_id.clone(),
            _ => return Ok(None),
        };
        Ok(self.accounts.get(&account_id).map(|a| a.clone()))
    }

    async fn get_session(&self, key: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(key).map(|s| s.clone()))
    }

    async fn close_session(&self, key: &str) -> Result<()> {
        self.sessions.remove(key);
        debug!("Closed session {}", key);
        Ok(())
    }

    async fn verify_app_token(&self, app_id: &str, token: &str) -> Result<Option<AppGrant>> {
        Ok(self
            .apps
            .get(&(app_id.to_string(), token.to_string()))
            .map(|g| g.clone()))
    }

    async fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        Ok(self.accounts.get(account_id).map(|a| a.clone()))
    }

    async fn get_place(&self, place_id: &str) -> Result<Option<Place>> {
        Ok(self.places.get(place_id).map(|p| p.clone()))
    }

    async fn add_post(&self, post: NewPost) -> Result<Post> {
        let post = Post {
            id: new_id("post_"),
            sender_id: post.sender_id,
            place_ids: post.place_ids,
            recipients: post.recipients,
            created_at: Utc::now(),
        };
        self.posts.insert(post.id.clone(), post.clone());
        Ok(post)
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self.task(task_id))
    }

    async fn set_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        if let Some(mut task) = self.tasks.get_mut(task_id) {
            task.status = status;
        }
        Ok(())
    }

    async fn due_task_buckets(&self, now: DateTime<Utc>) -> Result<Vec<TaskBucket>> {
        let mut due: Vec<TaskBucket> = self
            .buckets
            .iter()
            .filter(|b| b.due_at <= now)
            .map(|b| b.clone())
            .collect();
        due.sort_by_key(|b| b.due_at);
        Ok(due)
    }

    async fn remove_task_bucket(&self, due_at: DateTime<Utc>) -> Result<()> {
        self.buckets.remove(&due_at.timestamp_millis());
        Ok(())
    }

    async fn add_notification(&self, notification: NewNotification) -> Result<Notification> {
        let notification = Notification {
            id: new_id("ntfy_"),
            kind: notification.kind,
            account_id: notification.account_id,
            actor_id: notification.actor_id,
            place_id: notification.place_id,
            post_id: notification.post_id,
            task_id: notification.task_id,
            text: notification.text,
            created_at: Utc::now(),
        };
        *self.unread.entry(notification.account_id.clone()).or_insert(0) += 1;
        self.notifications
            .insert(notification.id.clone(), notification.clone());
        Ok(notification)
    }

    async fn unread_count(&self, account_id: &str) -> Result<u64> {
        Ok(self.unread.get(account_id).map(|c| *c).unwrap_or(0))
    }

    async fn reset_unread(&self, account_id: &str) -> Result<()> {
        self.unread.insert(account_id.to_string(), 0);
        Ok(())
    }

    async fn get_license(&self) -> Result<Option<License>> {
        let license = self
            .license
            .read()
            .map_err(|_| crate::GatewayError::Model("license lock poisoned".into()))?;
        Ok(*license)
    }

    async fn set_license(&self, license: License) -> Result<()> {
        let mut current = self
            .license
            .write()
            .map_err(|_| crate::GatewayError::Model("license lock poisoned".into()))?;
        *current = Some(license);
        Ok(())
    }

    async fn flush_report(&self, counters: HashMap<String, u64>) -> Result<()> {
        for (key, value) in counters {
            *self.reports.entry(key).or_insert(0) += value;
        }
        Ok(())
    }

    async fn set_system_info(&self, info: SystemInfo) -> Result<()> {
        self.system_info.insert(info.bundle_id.clone(), info);
        Ok(())
    }
}
