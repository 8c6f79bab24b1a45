use chrono::Utc;
use planpilot_schema::{NewTask, Profile, Task, TaskComment, TaskPatch};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::task::join_tags;
use super::{Keyed, StoreCell, TaskStore};
use crate::error::PilotError;
use crate::gateway::{self, Query};

impl Keyed for TaskComment {
    fn key(&self) -> Uuid {
        self.id
    }
}

/// One task opened in the side panel: its fields, subtasks and comment thread.
pub struct TaskDetail {
    store: TaskStore,
    task: Task,
    subtasks: StoreCell<Task>,
    comments: StoreCell<TaskComment>,
}

impl TaskDetail {
    pub async fn load(store: &TaskStore, task_id: Uuid) -> Result<Self, PilotError> {
        let gw = store.gateway().as_ref();
        let mut rows: Vec<Task> = gateway::fetch(gw, &Query::table("tasks").eq("id", task_id)).await?;
        join_tags(gw, &mut rows).await?;
        let task = rows
            .into_iter()
            .next()
            .ok_or_else(|| PilotError::not_found("task", task_id))?;

        let subtasks = store.fetch_subtasks(task_id).await?;

        let mut comments: Vec<TaskComment> = gateway::fetch(
            gw,
            &Query::table("task_comments")
                .eq("task_id", task_id)
                .order_by("created_at", true),
        )
        .await?;
        let authors: HashSet<Uuid> = comments.iter().map(|c| c.user_id).collect();
        if !authors.is_empty() {
            let profiles: Vec<Profile> =
                gateway::fetch(gw, &Query::table("profiles").in_list("id", authors)).await?;
            let profiles: HashMap<Uuid, Profile> =
                profiles.into_iter().map(|p| (p.id, p)).collect();
            for comment in &mut comments {
                comment.author = profiles.get(&comment.user_id).cloned();
            }
        }

        let detail = Self {
            store: store.clone(),
            task,
            subtasks: StoreCell::new(),
            comments: StoreCell::new(),
        };
        detail.subtasks.replace_all(subtasks);
        detail.comments.replace_all(comments);
        Ok(detail)
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn subtasks(&self) -> Vec<Task> {
        self.subtasks.items()
    }

    pub fn comments(&self) -> Vec<TaskComment> {
        self.comments.items()
    }

    /// (done, total) across subtasks.
    pub fn subtask_progress(&self) -> (usize, usize) {
        let subtasks = self.subtasks.items();
        let done = subtasks.iter().filter(|s| s.status.is_done()).count();
        (done, subtasks.len())
    }

    /// Saves edited fields through the task store.
    pub async fn save(&mut self, patch: TaskPatch) -> Result<(), PilotError> {
        let before = self.task.clone();
        patch.apply(&mut self.task);
        if let Err(err) = self.store.update(self.task.id, patch).await {
            self.task = before;
            return Err(err);
        }
        Ok(())
    }

    /// Flips done and todo from this panel's copy and writes that exact status
    /// through the store, so the list and the panel agree.
    pub async fn toggle(&mut self) -> Result<(), PilotError> {
        let patch = TaskPatch::toggle(&self.task, Utc::now());
        self.save(patch).await
    }

    pub async fn add_subtask(&self, title: &str) -> Result<Task, PilotError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(PilotError::validation("Subtask title is required"));
        }
        let id = Uuid::new_v4();
        let mut input = NewTask::subtask_of(&self.task, title);
        input.created_by = self.store.user_id();
        let mut row = serde_json::to_value(&input)?;
        if let Some(fields) = row.as_object_mut() {
            fields.insert("id".to_string(), json!(id));
        }

        let provisional = Task {
            id,
            title: title.to_string(),
            description: None,
            status: input.status,
            priority: input.priority,
            due_date: None,
            completed_at: None,
            parent_id: Some(self.task.id),
            workspace_id: self.task.workspace_id,
            created_by: input.created_by,
            sort_order: 0,
            created_at: Utc::now(),
            tags: Vec::new(),
        };
        let undo = self.subtasks.insert_at(usize::MAX, provisional);
        let result = self.store.gateway().insert("tasks", vec![row]).await;
        let stored = self.subtasks.settle("add subtask", Some(undo), result)?;
        let subtask = gateway::decode_rows::<Task>(stored)?
            .into_iter()
            .next()
            .ok_or_else(|| PilotError::not_found("task", id))?;
        self.subtasks.upsert(subtask.clone());
        Ok(subtask)
    }

    pub async fn toggle_subtask(&self, id: Uuid) -> Result<(), PilotError> {
        let subtask = self
            .subtasks
            .get(id)
            .ok_or_else(|| PilotError::not_found("subtask", id))?;
        let patch = TaskPatch::toggle(&subtask, Utc::now());
        let undo = self.subtasks.update_with(id, |s| patch.apply(s));
        let result = self
            .store
            .gateway()
            .update(&Query::table("tasks").eq("id", id), serde_json::to_value(&patch)?)
            .await;
        self.subtasks.settle("toggle subtask", undo, result)?;
        Ok(())
    }

    pub async fn delete_subtask(&self, id: Uuid) -> Result<(), PilotError> {
        let undo = self.subtasks.remove(id);
        let result = self
            .store
            .gateway()
            .delete(&Query::table("tasks").eq("id", id))
            .await;
        self.subtasks.settle("delete subtask", undo, result)?;
        Ok(())
    }

    pub async fn add_comment(&self, content: &str) -> Result<TaskComment, PilotError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(PilotError::validation("Comment cannot be empty"));
        }
        let user_id = self.store.user_id();
        let gw = self.store.gateway().as_ref();
        let id = Uuid::new_v4();
        let provisional = TaskComment {
            id,
            task_id: self.task.id,
            user_id,
            content: content.to_string(),
            created_at: Utc::now(),
            author: None,
        };
        let undo = self.comments.insert_at(usize::MAX, provisional);
        let result = gw
            .insert(
                "task_comments",
                vec![json!({
                    "id": id,
                    "task_id": self.task.id,
                    "user_id": user_id,
                    "content": content,
                })],
            )
            .await;
        let stored = self.comments.settle("add comment", Some(undo), result)?;
        let mut comment = gateway::decode_rows::<TaskComment>(stored)?
            .into_iter()
            .next()
            .ok_or_else(|| PilotError::not_found("comment", id))?;

        // author is display-only; a failed lookup leaves it empty
        let profile = Query::table("profiles").eq("id", user_id);
        if let Ok(profiles) = gateway::fetch::<Profile>(gw, &profile).await {
            comment.author = profiles.into_iter().next();
        }
        self.comments.upsert(comment.clone());
        Ok(comment)
    }

    pub async fn delete_comment(&self, id: Uuid) -> Result<(), PilotError> {
        let undo = self.comments.remove(id);
        let result = self
            .store
            .gateway()
            .delete(&Query::table("task_comments").eq("id", id))
            .await;
        self.comments.settle("delete comment", undo, result)?;
        Ok(())
    }

    /// Deletes the task itself; subtasks and comments go with it server-side.
    pub async fn delete_task(self) -> Result<(), PilotError> {
        self.store.delete(self.task.id).await
    }
}
