//! External push templates, one per notification kind.

use crate::model::{Account, Notification, NotificationKind};
use std::collections::HashMap;

/// Static part of an external push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template {
    /// Text following the actor name.
    pub text: &'static str,
    pub sound: &'static str,
}

const fn t(text: &'static str, sound: &'static str) -> Option<Template> {
    Some(Template { text, sound })
}

/// Template for `kind`. Kinds without an entry are never pushed.
pub fn template(kind: NotificationKind) -> Option<Template> {
    use NotificationKind::*;
    match kind {
        Mention => t("mentioned you", "mention.aiff"),
        Comment => t("commented on your post", "comment.aiff"),
        JoinedPlace => t("added you to a place", "default"),
        Promoted => t("promoted you", "default"),
        Demoted => t("demoted you", "default"),
        PlaceSettingsChanged => t("changed the place settings", "default"),
        NewSession => t("logged in from a new device", "alert.aiff"),
        LabelRequestApproved => t("approved your label request", "default"),
        LabelRequestRejected => t("rejected your label request", "default"),
        LabelRequestCreated => t("requested a label", "default"),
        TaskMention => t("mentioned you in a task", "mention.aiff"),
        TaskComment => t("commented on your task", "comment.aiff"),
        TaskAssigned => t("assigned you a task", "task.aiff"),
        TaskAccepted => t("accepted your task", "task.aiff"),
        TaskRejected => t("rejected your task", "task.aiff"),
        TaskCompleted => t("completed your task", "task.aiff"),
        TaskOverdue => t("has an overdue task with you", "alert.aiff"),
        TaskCandidateAdded => t("added you as a task candidate", "task.aiff"),
        TaskWatcherAdded => t("added you as a task watcher", "task.aiff"),
        TaskEditorAdded => t("added you as a task editor", "task.aiff"),
        Unknown(_) => None,
    }
}

/// Human-readable payload for a notification, or `None` when the kind has
/// no template.
pub fn external_payload(
    notification: &Notification,
    actor: &Account,
) -> Option<HashMap<String, String>> {
    let template = template(notification.kind)?;

    let mut data = HashMap::new();
    data.insert("notification_id".to_string(), notification.id.clone());
    data.insert("kind".to_string(), u16::from(notification.kind).to_string());
    data.insert("actor_id".to_string(), actor.id.clone());
    data.insert("actor_name".to_string(), actor.name.clone());
    data.insert("actor_picture".to_string(), actor.picture.clone());
    data.insert("msg".to_string(), format!("{} {}", actor.name, template.text));
    data.insert("sound".to_string(), template.sound.to_string());
    if !notification.text.is_empty() {
        data.insert("text".to_string(), notification.text.clone());
    }
    if let Some(place_id) = &notification.place_id {
        data.insert("place_id".to_string(), place_id.clone());
    }
    if let Some(post_id) = &notification.post_id {
        data.insert("post_id".to_string(), post_id.clone());
    }
    if let Some(task_id) = &notification.task_id {
        data.insert("task_id".to_string(), task_id.clone());
    }
    Some(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn notification(kind: NotificationKind) -> Notification {
        Notification {
            id: "n1".into(),
            kind,
            account_id: "bob".into(),
            actor_id: "alice".into(),
            place_id: Some("p1".into()),
            post_id: None,
            task_id: None,
            text: String::new(),
            created_at: Utc::now(),
        }
    }

    fn alice() -> Account {
        Account {
            id: "alice".into(),
            name: "Alice".into(),
            picture: "alice.png".into(),
            admin: false,
        }
    }

    #[test]
    fn test_every_known_kind_has_template() {
        for code in 1..=20u16 {
            assert!(template(NotificationKind::from(code)).is_some(), "code {code}");
        }
    }

    #[test]
    fn test_mention_payload() {
        let data = external_payload(&notification(NotificationKind::Mention), &alice()).unwrap();
        assert_eq!(data["msg"], "Alice mentioned you");
        assert_eq!(data["kind"], "1");
        assert_eq!(data["place_id"], "p1");
        assert!(!data.contains_key("post_id"));
    }

    #[test]
    fn test_unknown_kind_is_skipped() {
        let n = notification(NotificationKind::Unknown(99));
        assert!(external_payload(&n, &alice()).is_none());
    }
}
