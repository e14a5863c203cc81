//! Persistence boundary.
//!
//! The gateway core never owns domain state. Everything it needs about
//! accounts, places, posts, tasks and notifications is read or written
//! through [`Model`]. Only identity fields and membership predicates are
//! modelled here; full domain objects belong to the persistence layer.

pub mod memory;

pub use memory::MemoryModel;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub picture: String,
    /// Account has admin authority.
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub key: String,
    pub secret: String,
    pub account_id: String,
}

/// A registered application token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppGrant {
    pub app_id: String,
    /// Account the token was issued for.
    pub account_id: String,
    /// Granted scope, `1..=3`.
    pub scope: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Place {
    pub id: String,
    pub name: String,
    /// Creators and key holders.
    pub creators: Vec<String>,
    pub key_holders: Vec<String>,
}

impl Place {
    /// All member ids, creators first, without duplicates.
    pub fn members(&self) -> Vec<String> {
        let mut members = self.creators.clone();
        for id in &self.key_holders {
            if !members.contains(id) {
                members.push(id.clone());
            }
        }
        members
    }

    pub fn is_member(&self, account_id: &str) -> bool {
        self.creators.iter().chain(&self.key_holders).any(|id| id == account_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub sender_id: String,
    pub place_ids: Vec<String>,
    /// External email recipients.
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub sender_id: String,
    pub place_ids: Vec<String>,
    pub recipients: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotAssigned,
    Assigned,
    Completed,
    Failed,
    Hold,
    Canceled,
    Rejected,
    Overdue,
}

impl TaskStatus {
    /// Terminal statuses are never moved to overdue.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Hold | Self::Canceled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub assignor_id: String,
    pub assignee_id: Option<String>,
    pub status: TaskStatus,
    pub due_at: DateTime<Utc>,
}

/// Index entry grouping tasks due before `due_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBucket {
    pub due_at: DateTime<Utc>,
    pub task_ids: Vec<String>,
}

/// Notification types.
///
/// Stored as numeric codes; codes this build does not know decode to
/// [`NotificationKind::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum NotificationKind {
    Mention,
    Comment,
    JoinedPlace,
    Promoted,
    Demoted,
    PlaceSettingsChanged,
    NewSession,
    LabelRequestApproved,
    LabelRequestRejected,
    LabelRequestCreated,
    TaskMention,
    TaskComment,
    TaskAssigned,
    TaskAccepted,
    TaskRejected,
    TaskCompleted,
    TaskOverdue,
    TaskCandidateAdded,
    TaskWatcherAdded,
    TaskEditorAdded,
    Unknown(u16),
}

impl From<u16> for NotificationKind {
    fn from(code: u16) -> Self {
        match code {
            1 => Self::Mention,
            2 => Self::Comment,
            3 => Self::JoinedPlace,
            4 => Self::Promoted,
            5 => Self::Demoted,
            6 => Self::PlaceSettingsChanged,
            7 => Self::NewSession,
            8 => Self::LabelRequestApproved,
            9 => Self::LabelRequestRejected,
            10 => Self::LabelRequestCreated,
            11 => Self::TaskMention,
            12 => Self::TaskComment,
            13 => Self::TaskAssigned,
            14 => Self::TaskAccepted,
            15 => Self::TaskRejected,
            16 => Self::TaskCompleted,
            17 => Self::TaskOverdue,
            18 => Self::TaskCandidateAdded,
            19 => Self::TaskWatcherAdded,
            20 => Self::TaskEditorAdded,
            other => Self::Unknown(other),
        }
    }
}

impl From<NotificationKind> for u16 {
    fn from(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::Mention => 1,
            NotificationKind::Comment => 2,
            NotificationKind::JoinedPlace => 3,
            NotificationKind::Promoted => 4,
            NotificationKind::Demoted => 5,
            NotificationKind::PlaceSettingsChanged => 6,
            NotificationKind::NewSession => 7,
            NotificationKind::LabelRequestApproved => 8,
            NotificationKind::LabelRequestRejected => 9,
            NotificationKind::LabelRequestCreated => 10,
            NotificationKind::TaskMention => 11,
            NotificationKind::TaskComment => 12,
            NotificationKind::TaskAssigned => 13,
            NotificationKind::TaskAccepted => 14,
            NotificationKind::TaskRejected => 15,
            NotificationKind::TaskCompleted => 16,
            NotificationKind::TaskOverdue => 17,
            NotificationKind::TaskCandidateAdded => 18,
            NotificationKind::TaskWatcherAdded => 19,
            NotificationKind::TaskEditorAdded => 20,
            NotificationKind::Unknown(code) => code,
        }
    }
}

/// Notification to be recorded for `account_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub account_id: String,
    pub actor_id: String,
    pub place_id: Option<String>,
    pub post_id: Option<String>,
    pub task_id: Option<String>,
    /// Free text (comment body, label title, ...).
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub account_id: String,
    pub actor_id: String,
    pub place_id: Option<String>,
    pub post_id: Option<String>,
    pub task_id: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub expires_at: DateTime<Utc>,
}

/// Per-bundle snapshot stored by the report flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub bundle_id: String,
    pub connections: usize,
    pub license_expired: bool,
    pub license_slow_mode: Option<u8>,
    pub reported_at: DateTime<Utc>,
}

/// The persistence layer as seen by the gateway.
#[async_trait]
pub trait Model: Send + Sync + 'static {
    // Credentials
    async fn verify_session(&self, key: &str, secret: &str) -> Result<Option<Account>>;
    async fn get_session(&self, key: &str) -> Result<Option<Session>>;
    async fn close_session(&self, key: &str) -> Result<()>;
    async fn verify_app_token(&self, app_id: &str, token: &str) -> Result<Option<AppGrant>>;

    // Accounts and places
    async fn get_account(&self, account_id: &str) -> Result<Option<Account>>;
    async fn get_place(&self, place_id: &str) -> Result<Option<Place>>;

    // Posts
    async fn add_post(&self, post: NewPost) -> Result<Post>;

    // Tasks
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>>;
    async fn set_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()>;
    /// Buckets whose deadline is at or before `now`.
    async fn due_task_buckets(&self, now: DateTime<Utc>) -> Result<Vec<TaskBucket>>;
    async fn remove_task_bucket(&self, due_at: DateTime<Utc>) -> Result<()>;

    // Notifications
    async fn add_notification(&self, notification: NewNotification) -> Result<Notification>;
    async fn unread_count(&self, account_id: &str) -> Result<u64>;
    async fn reset_unread(&self, account_id: &str) -> Result<()>;

    // System
    async fn get_license(&self) -> Result<Option<License>>;
    async fn set_license(&self, license: License) -> Result<()>;
    async fn flush_report(&self, counters: HashMap<String, u64>) -> Result<()>;
    async fn set_system_info(&self, info: SystemInfo) -> Result<()>;
}
