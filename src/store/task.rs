use chrono::Utc;
use planpilot_schema::{NewTask, Tag, Task, TaskPatch, TaskStatus, TaskTag};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Snapshot, StoreCell};
use crate::error::PilotError;
use crate::gateway::{self, Gateway, Query, RowPatch};

/// Top-level tasks created by one user, in manual (`sort_order`) order.
#[derive(Clone)]
pub struct TaskStore {
    gateway: Arc<dyn Gateway>,
    user_id: Uuid,
    cell: StoreCell<Task>,
}

impl TaskStore {
    pub fn new(gateway: Arc<dyn Gateway>, user_id: Uuid) -> Self {
        Self {
            gateway,
            user_id,
            cell: StoreCell::new(),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub(crate) fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.cell.items()
    }

    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.cell.get(id)
    }

    pub fn snapshot(&self) -> Snapshot<Task> {
        self.cell.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot<Task>> {
        self.cell.subscribe()
    }

    /// Replaces the cache with the remote top-level tasks; on failure the cache is kept.
    pub async fn fetch_all(&self) -> Result<(), PilotError> {
        self.cell.set_loading();
        match self.load().await {
            Ok(tasks) => {
                debug!(user_id = %self.user_id, count = tasks.len(), "tasks fetched");
                self.cell.finish_load(Ok(tasks));
                Ok(())
            }
            Err(err) => {
                warn!(user_id = %self.user_id, error = %err, "task fetch failed");
                self.cell.finish_load(Err(&err));
                Err(err)
            }
        }
    }

    async fn load(&self) -> Result<Vec<Task>, PilotError> {
        let query = Query::table("tasks")
            .eq("created_by", self.user_id)
            .is_null("parent_id")
            .order_by("sort_order", true);
        let mut tasks: Vec<Task> = gateway::fetch(self.gateway.as_ref(), &query).await?;
        join_tags(self.gateway.as_ref(), &mut tasks).await?;
        Ok(tasks)
    }

    /// Re-fetch after a successful write; a failure here only leaves stale rows.
    async fn reconcile(&self) {
        if let Err(err) = self.fetch_all().await {
            warn!(error = %err, "reconcile after write failed");
        }
    }

    pub async fn fetch_subtasks(&self, parent_id: Uuid) -> Result<Vec<Task>, PilotError> {
        let query = Query::table("tasks")
            .eq("parent_id", parent_id)
            .order_by("created_at", true);
        Ok(gateway::fetch(self.gateway.as_ref(), &query).await?)
    }

    /// Inserts the task, its tag links and its non-blank subtasks.
    pub async fn create(&self, input: NewTask) -> Result<Task, PilotError> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(PilotError::validation("Task title is required"));
        }

        let id = Uuid::new_v4();
        let mut row = serde_json::to_value(&input)?;
        if let Some(fields) = row.as_object_mut() {
            fields.insert("id".to_string(), json!(id));
            fields.insert("title".to_string(), json!(title));
        }

        let visible = input.parent_id.is_none() && input.created_by == self.user_id;
        let undo = visible.then(|| {
            let provisional = Task {
                id,
                title: title.to_string(),
                description: input.description.clone(),
                status: input.status,
                priority: input.priority,
                due_date: input.due_date,
                completed_at: None,
                parent_id: None,
                workspace_id: input.workspace_id,
                created_by: input.created_by,
                sort_order: input.sort_order.unwrap_or(0),
                created_at: Utc::now(),
                tags: Vec::new(),
            };
            self.cell.insert_at(0, provisional)
        });

        let inserted = self.gateway.insert("tasks", vec![row]).await;
        let stored = self.cell.settle("create task", undo, inserted)?;
        let task: Task = gateway::decode_rows(stored)?
            .into_iter()
            .next()
            .ok_or_else(|| PilotError::not_found("task", id))?;

        // the task row exists from here on; link failures are logged, not reverted
        if !input.tag_ids.is_empty() {
            let links = input
                .tag_ids
                .iter()
                .map(|tag_id| {
                    serde_json::to_value(TaskTag {
                        task_id: task.id,
                        tag_id: *tag_id,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if let Err(err) = self.gateway.insert("task_tags", links).await {
                warn!(task_id = %task.id, error = %err, "task tag links not saved");
            }
        }

        let subtasks = input
            .subtasks
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| serde_json::to_value(NewTask::subtask_of(&task, s)))
            .collect::<Result<Vec<_>, _>>()?;
        if !subtasks.is_empty()
            && let Err(err) = self.gateway.insert("tasks", subtasks).await
        {
            warn!(task_id = %task.id, error = %err, "subtasks not saved");
        }

        info!(task_id = %task.id, "task created");
        self.reconcile().await;
        Ok(task)
    }

    /// Applies `patch` locally, persists it, and re-fetches; reverts on failure.
    pub async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<(), PilotError> {
        if patch.is_empty() {
            return Ok(());
        }
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(PilotError::validation("Task title is required"));
        }
        let undo = self.cell.update_with(id, |task| patch.apply(task));
        let body = serde_json::to_value(&patch)?;
        let result = self
            .gateway
            .update(&Query::table("tasks").eq("id", id), body)
            .await;
        self.cell.settle("update task", undo, result)?;
        self.reconcile().await;
        Ok(())
    }

    /// Flips done and todo, setting or clearing `completed_at`.
    pub async fn toggle_status(&self, id: Uuid) -> Result<Task, PilotError> {
        let task = self
            .cell
            .get(id)
            .ok_or_else(|| PilotError::not_found("task", id))?;
        let patch = TaskPatch::toggle(&task, Utc::now());
        let undo = self.cell.update_with(id, |task| patch.apply(task));
        let body = serde_json::to_value(&patch)?;
        let result = self
            .gateway
            .update(&Query::table("tasks").eq("id", id), body)
            .await;
        self.cell.settle("toggle task", undo, result)?;

        let mut toggled = task;
        patch.apply(&mut toggled);
        debug!(task_id = %id, status = toggled.status.as_str(), "task toggled");
        Ok(toggled)
    }

    /// Sets an explicit status (board columns, cancel).
    pub async fn set_status(&self, id: Uuid, status: TaskStatus) -> Result<(), PilotError> {
        let completed_at = status.is_done().then(Utc::now);
        self.update(
            id,
            TaskPatch {
                status: Some(status),
                completed_at: Some(completed_at),
                ..Default::default()
            },
        )
        .await
    }

    /// Removes the task from the cache at once; the row comes back if the remote delete fails.
    pub async fn delete(&self, id: Uuid) -> Result<(), PilotError> {
        let undo = self.cell.remove(id);
        let result = self
            .gateway
            .delete(&Query::table("tasks").eq("id", id))
            .await;
        self.cell.settle("delete task", undo, result)?;
        info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// Puts `ordered_ids` first and renumbers the whole list 0.., persisting
    /// every changed `sort_order` in one batch.
    ///
    /// Cached tasks not named keep their relative order after the reordered ones.
    pub async fn reorder(&self, ordered_ids: &[Uuid]) -> Result<(), PilotError> {
        let current = self.cell.items();
        if let Some(missing) = ordered_ids.iter().find(|id| !current.iter().any(|t| t.id == **id)) {
            return Err(PilotError::not_found("task", missing));
        }

        let before: HashMap<Uuid, i64> = current.iter().map(|t| (t.id, t.sort_order)).collect();
        let reordered = reorder_tasks(&current, ordered_ids);
        let patches: Vec<RowPatch> = reordered
            .iter()
            .filter(|task| before.get(&task.id) != Some(&task.sort_order))
            .map(|task| RowPatch {
                id: task.id,
                patch: json!({ "sort_order": task.sort_order }),
            })
            .collect();
        if patches.is_empty() {
            return Ok(());
        }

        let changed = patches.len();
        let undo = self.cell.replace_all(reordered);
        let result = self.gateway.update_many("tasks", patches).await;
        self.cell.settle("reorder tasks", Some(undo), result)?;
        debug!(changed, "task order persisted");
        Ok(())
    }

    /// Drag-and-drop move within the cached list.
    pub async fn move_task(&self, from: usize, to: usize) -> Result<(), PilotError> {
        let mut ids: Vec<Uuid> = self.cell.items().iter().map(|t| t.id).collect();
        if from >= ids.len() || to >= ids.len() {
            return Err(PilotError::validation("Task position out of range"));
        }
        if from == to {
            return Ok(());
        }
        let id = ids.remove(from);
        ids.insert(to, id);
        self.reorder(&ids).await
    }

    pub fn clear(&self) {
        self.cell.clear();
    }
}

/// `ordered_ids` first, then the remaining tasks in their cached order, all
/// renumbered with `sort_order` 0..
pub(crate) fn reorder_tasks(tasks: &[Task], ordered_ids: &[Uuid]) -> Vec<Task> {
    let mut seen = HashSet::new();
    let mut out: Vec<Task> = ordered_ids
        .iter()
        .filter(|id| seen.insert(**id))
        .filter_map(|id| tasks.iter().find(|t| t.id == *id).cloned())
        .collect();
    out.extend(tasks.iter().filter(|t| !seen.contains(&t.id)).cloned());
    for (index, task) in out.iter_mut().enumerate() {
        task.sort_order = i64::try_from(index).unwrap_or(i64::MAX);
    }
    out
}

/// Attaches tags through `task_tags`, one query per table.
pub(crate) async fn join_tags(gateway: &dyn Gateway, tasks: &mut [Task]) -> Result<(), PilotError> {
    if tasks.is_empty() {
        return Ok(());
    }
    let links: Vec<TaskTag> = gateway::fetch(
        gateway,
        &Query::table("task_tags").in_list("task_id", tasks.iter().map(|t| t.id)),
    )
    .await?;
    if links.is_empty() {
        return Ok(());
    }

    let tag_ids: HashSet<Uuid> = links.iter().map(|l| l.tag_id).collect();
    let tags: Vec<Tag> =
        gateway::fetch(gateway, &Query::table("tags").in_list("id", tag_ids)).await?;
    let tags: HashMap<Uuid, Tag> = tags.into_iter().map(|t| (t.id, t)).collect();

    for task in tasks.iter_mut() {
        task.tags = links
            .iter()
            .filter(|l| l.task_id == task.id)
            .filter_map(|l| tags.get(&l.tag_id).cloned())
            .collect();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use planpilot_schema::Priority;

    fn task(title: &str, sort_order: i64) -> Task {
        Task {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: None,
            status: TaskStatus::Todo,
            priority: Priority::Medium,
            due_date: None,
            completed_at: None,
            parent_id: None,
            workspace_id: None,
            created_by: Uuid::nil(),
            sort_order,
            created_at: Utc::now(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn reorder_numbers_named_tasks_first() {
        let (a, b, c, d) = (task("a", 0), task("b", 1), task("c", 2), task("d", 3));
        let all = vec![a.clone(), b.clone(), c.clone(), d.clone()];
        let out = reorder_tasks(&all, &[c.id, a.id, b.id, c.id]);
        let titles: Vec<_> = out.iter().map(|t| (t.title.as_str(), t.sort_order)).collect();
        assert_eq!(titles, vec![("c", 0), ("a", 1), ("b", 2), ("d", 3)]);
    }

    #[test]
    fn partial_reorder_renumbers_the_rest() {
        let (a, b, c) = (task("a", 0), task("b", 1), task("c", 2));
        let out = reorder_tasks(&[a, b, c.clone()], &[c.id]);
        let titles: Vec<_> = out.iter().map(|t| (t.title.as_str(), t.sort_order)).collect();
        assert_eq!(titles, vec![("c", 0), ("a", 1), ("b", 2)]);
    }
}
