//! Pure view helpers for the task board: sort modes, status tabs and the stat pills.

use chrono::{DateTime, Utc};
use planpilot_schema::{Task, TaskStatus};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    /// Stored `sort_order`; the only mode drag-reorder applies to.
    #[default]
    Manual,
    CreatedDesc,
    CreatedAsc,
    DueAsc,
    Priority,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTab {
    #[default]
    All,
    Todo,
    InProgress,
    Done,
}

impl StatusTab {
    pub fn admits(self, status: TaskStatus) -> bool {
        match self {
            StatusTab::All => true,
            StatusTab::Todo => status == TaskStatus::Todo,
            StatusTab::InProgress => status == TaskStatus::InProgress,
            StatusTab::Done => status == TaskStatus::Done,
        }
    }
}

/// Stable sort; `DueAsc` puts undated tasks last.
pub fn sort_tasks(tasks: &[Task], mode: SortMode) -> Vec<Task> {
    let mut out = tasks.to_vec();
    match mode {
        SortMode::Manual => {}
        SortMode::CreatedAsc => out.sort_by_key(|t| t.created_at),
        SortMode::CreatedDesc => out.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortMode::DueAsc => out.sort_by(|a, b| match (a.due_date, b.due_date) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => x.cmp(&y),
        }),
        SortMode::Priority => out.sort_by_key(|t| t.priority.rank()),
    }
    out
}

/// Tasks shown under `tab`, in `mode` order.
pub fn visible_tasks(tasks: &[Task], tab: StatusTab, mode: SortMode) -> Vec<Task> {
    let filtered: Vec<Task> = tasks
        .iter()
        .filter(|t| tab.admits(t.status))
        .cloned()
        .collect();
    sort_tasks(&filtered, mode)
}

/// Count badge next to a tab.
pub fn tab_count(tasks: &[Task], tab: StatusTab) -> usize {
    tasks.iter().filter(|t| tab.admits(t.status)).count()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BoardStats {
    pub total: usize,
    pub done: usize,
    /// Status `todo` only; in-progress work is not pending.
    pub pending: usize,
    pub overdue: usize,
}

pub fn board_stats(tasks: &[Task], now: DateTime<Utc>) -> BoardStats {
    BoardStats {
        total: tasks.len(),
        done: tasks.iter().filter(|t| t.status == TaskStatus::Done).count(),
        pending: tasks.iter().filter(|t| t.status == TaskStatus::Todo).count(),
        overdue: tasks.iter().filter(|t| t.is_overdue(now)).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use planpilot_schema::Priority;
    use uuid::Uuid;

    fn task(title: &str, priority: Priority, due_in_days: Option<i64>, status: TaskStatus) -> Task {
        let base = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
        Task {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: None,
            status,
            priority,
            due_date: due_in_days.map(|d| base + Duration::days(d)),
            completed_at: None,
            parent_id: None,
            workspace_id: None,
            created_by: Uuid::nil(),
            sort_order: 0,
            created_at: base,
            tags: Vec::new(),
        }
    }

    fn titles(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.title.as_str()).collect()
    }

    #[test]
    fn due_sort_puts_undated_last() {
        let tasks = vec![
            task("none", Priority::Low, None, TaskStatus::Todo),
            task("later", Priority::Low, Some(3), TaskStatus::Todo),
            task("soon", Priority::Low, Some(1), TaskStatus::Todo),
        ];
        assert_eq!(titles(&sort_tasks(&tasks, SortMode::DueAsc)), ["soon", "later", "none"]);
        assert_eq!(titles(&sort_tasks(&tasks, SortMode::Manual)), ["none", "later", "soon"]);
    }

    #[test]
    fn priority_sort_is_urgent_first() {
        let tasks = vec![
            task("low", Priority::Low, None, TaskStatus::Todo),
            task("urgent", Priority::Urgent, None, TaskStatus::Todo),
            task("medium", Priority::Medium, None, TaskStatus::Todo),
            task("high", Priority::High, None, TaskStatus::Todo),
        ];
        assert_eq!(
            titles(&sort_tasks(&tasks, SortMode::Priority)),
            ["urgent", "high", "medium", "low"]
        );
    }

    #[test]
    fn stats_count_overdue_open_tasks() {
        let now = Utc.with_ymd_and_hms(2026, 10, 20, 9, 0, 0).unwrap();
        let tasks = vec![
            task("late", Priority::Low, Some(1), TaskStatus::Todo),
            task("late but done", Priority::Low, Some(1), TaskStatus::Done),
            task("working", Priority::Low, Some(5), TaskStatus::InProgress),
        ];
        let stats = board_stats(&tasks, now);
        assert_eq!(
            stats,
            BoardStats {
                total: 3,
                done: 1,
                pending: 1,
                overdue: 1
            }
        );
        assert_eq!(tab_count(&tasks, StatusTab::InProgress), 1);
        assert_eq!(
            titles(&visible_tasks(&tasks, StatusTab::Done, SortMode::Manual)),
            ["late but done"]
        );
    }
}
