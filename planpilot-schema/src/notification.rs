use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Reminder,
    TaskAssigned,
    CollabInvite,
    Mention,
    StreakBroken,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Reminder => "reminder",
            NotificationKind::TaskAssigned => "task_assigned",
            NotificationKind::CollabInvite => "collab_invite",
            NotificationKind::Mention => "mention",
            NotificationKind::StreakBroken => "streak_broken",
        }
    }
}

/// One row of `notifications`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub body: Option<String>,
    pub link: Option<String>,
}

impl NewNotification {
    pub fn new(user_id: Uuid, kind: NotificationKind, title: impl Into<String>) -> Self {
        Self {
            user_id,
            kind,
            title: title.into(),
            body: None,
            link: None,
        }
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_written_as_type_column() {
        let user = Uuid::new_v4();
        let row = NewNotification::new(user, NotificationKind::StreakBroken, "🔥 Streak broken")
            .link("/habits?highlight=1");
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["type"], "streak_broken");
        assert_eq!(value["link"], "/habits?highlight=1");
        assert!(value["body"].is_null());
    }
}
