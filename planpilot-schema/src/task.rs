use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workspace::Profile;

/// Lifecycle state of a task row.
///
/// `todo -> in_progress -> done`, `done -> todo`, and `* -> cancelled` are the
/// transitions the board offers; nothing below the presentation layer validates them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::Done,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// The status a checkbox click flips to: done goes back to todo, anything else is done.
    pub fn toggled(self) -> Self {
        match self {
            TaskStatus::Done => TaskStatus::Todo,
            _ => TaskStatus::Done,
        }
    }

    pub fn is_done(self) -> bool {
        self == TaskStatus::Done
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    /// Sort rank, most pressing first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Urgent => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }
}

/// One row of `tasks`. A row with `parent_id` set is a subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub workspace_id: Option<Uuid>,
    pub created_by: Uuid,
    #[serde(default)]
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,

    /// Joined from `task_tags`/`tags`; read-only projection.
    #[serde(default, skip_serializing)]
    pub tags: Vec<Tag>,
}

impl Task {
    pub fn is_subtask(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Past due and still open.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status != TaskStatus::Done && self.due_date.is_some_and(|due| due < now)
    }
}

/// Insert payload for `tasks`. Tag links and subtask titles are written by the
/// store after the main row exists.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewTask {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub parent_id: Option<Uuid>,
    pub workspace_id: Option<Uuid>,
    pub created_by: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,

    #[serde(skip)]
    pub tag_ids: Vec<Uuid>,
    #[serde(skip)]
    pub subtasks: Vec<String>,
}

impl NewTask {
    pub fn new(title: impl Into<String>, created_by: Uuid) -> Self {
        Self {
            title: title.into(),
            created_by,
            ..Default::default()
        }
    }

    pub fn subtask_of(parent: &Task, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            parent_id: Some(parent.id),
            workspace_id: parent.workspace_id,
            created_by: parent.created_by,
            ..Default::default()
        }
    }
}

/// Partial update for `tasks`. Outer `None` leaves the column alone; for nullable
/// columns `Some(None)` writes `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<Option<Uuid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
}

impl TaskPatch {
    /// The patch a status toggle writes: the flipped status and its `completed_at`.
    pub fn toggle(task: &Task, now: DateTime<Utc>) -> Self {
        let status = task.status.toggled();
        Self {
            status: Some(status),
            completed_at: Some(status.is_done().then_some(now)),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            task.description.clone_from(description);
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(completed_at) = self.completed_at {
            task.completed_at = completed_at;
        }
        if let Some(workspace_id) = self.workspace_id {
            task.workspace_id = workspace_id;
        }
        if let Some(sort_order) = self.sort_order {
            task.sort_order = sort_order;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub workspace_id: Option<Uuid>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
}

/// Join row of the task/tag many-to-many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTag {
    pub task_id: Uuid,
    pub tag_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskComment {
    pub id: Uuid,
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,

    /// Joined from `profiles`; read-only projection.
    #[serde(default, skip_serializing)]
    pub author: Option<Profile>,
}
