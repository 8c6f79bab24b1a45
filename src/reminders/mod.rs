//! Reminder and streak evaluator.
//!
//! Two best-effort checks produce at most one notification per (user, task or
//! habit, local day): tasks coming due within the configured window, and habits
//! whose streak was broken yesterday. Today's notification links are the only
//! de-duplication key.

mod actor;

pub use actor::{ReminderHandle, ReminderMessage};

use chrono::{DateTime, Days, FixedOffset, NaiveDate, TimeDelta, Utc};
use planpilot_schema::{Habit, HabitLog, NewNotification, NotificationKind, Task, TaskStatus};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{HabitsConfig, RemindersConfig};
use crate::error::PilotError;
use crate::gateway::{self, Gateway, Query};
use crate::store::NotificationStore;
use crate::streak;

pub fn task_link(id: Uuid) -> String {
    format!("/tasks?highlight={id}")
}

pub fn habit_link(id: Uuid) -> String {
    format!("/habits?highlight={id}")
}

/// Notifications created by one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReminderReport {
    pub due_tasks: usize,
    pub broken_streaks: usize,
}

/// Start of the local day containing `now`, as an instant.
fn local_midnight(now: DateTime<FixedOffset>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(*now.offset()).single())
        .map_or_else(|| now.to_utc(), |midnight| midnight.to_utc())
}

/// Wording for a task due at `due`, seen at `now`.
pub fn due_task_notification(
    user_id: Uuid,
    task: &Task,
    due: DateTime<Utc>,
    now: DateTime<FixedOffset>,
) -> NewNotification {
    let overdue = due < now.to_utc();
    let due_today = due.with_timezone(now.offset()).date_naive() == now.date_naive();
    let (title, when) = match (overdue, due_today) {
        (true, _) => ("⚠️ Task overdue", "overdue"),
        (false, true) => ("📅 Task due soon", "due today"),
        (false, false) => ("📅 Task due soon", "due tomorrow"),
    };
    NewNotification::new(user_id, NotificationKind::Reminder, title)
        .body(format!("\"{}\" is {when}", task.title))
        .link(task_link(task.id))
}

pub fn streak_broken_notification(user_id: Uuid, habit: &Habit) -> NewNotification {
    NewNotification::new(user_id, NotificationKind::StreakBroken, "🔥 Streak broken")
        .body(format!(
            "You missed \"{}\" yesterday. Start a new streak today!",
            habit.name
        ))
        .link(habit_link(habit.id))
}

#[derive(Deserialize)]
struct LinkRow {
    #[serde(default)]
    link: Option<String>,
}

/// Runs the reminder checks for one user.
#[derive(Clone)]
pub struct ReminderEvaluator {
    gateway: Arc<dyn Gateway>,
    notifications: NotificationStore,
    user_id: Uuid,
    due_window: TimeDelta,
    streak_window_days: u32,
}

impl ReminderEvaluator {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        notifications: NotificationStore,
        reminders: &RemindersConfig,
        habits: &HabitsConfig,
    ) -> Self {
        Self {
            gateway,
            user_id: notifications.user_id(),
            notifications,
            due_window: TimeDelta::hours(reminders.due_window_hours.max(0)),
            streak_window_days: habits.streak_window_days.max(1),
        }
    }

    /// Runs both checks; failures are logged and counted as zero.
    pub async fn run(&self, now: DateTime<FixedOffset>) -> ReminderReport {
        let due_tasks = self
            .check_due_task_reminders(now)
            .await
            .unwrap_or_else(|err| {
                warn!(user_id = %self.user_id, error = %err, "due task reminder check failed");
                0
            });
        let broken_streaks = self.check_habit_streaks(now).await.unwrap_or_else(|err| {
            warn!(user_id = %self.user_id, error = %err, "habit streak check failed");
            0
        });
        let report = ReminderReport {
            due_tasks,
            broken_streaks,
        };
        if report != ReminderReport::default() {
            info!(user_id = %self.user_id, due_tasks, broken_streaks, "reminders created");
        }
        report
    }

    async fn links_since_midnight(
        &self,
        now: DateTime<FixedOffset>,
    ) -> Result<HashSet<String>, PilotError> {
        let rows: Vec<LinkRow> = gateway::fetch(
            self.gateway.as_ref(),
            &Query::table("notifications")
                .select("link")
                .eq("user_id", self.user_id)
                .not_null("link")
                .gte("created_at", local_midnight(now)),
        )
        .await?;
        Ok(rows.into_iter().filter_map(|row| row.link).collect())
    }

    /// Creates a reminder for each unfinished task due within the window that
    /// has not been reminded about today. Returns how many were created.
    pub async fn check_due_task_reminders(
        &self,
        now: DateTime<FixedOffset>,
    ) -> Result<usize, PilotError> {
        let from = now.to_utc();
        let until = from + self.due_window;
        let tasks: Vec<Task> = gateway::fetch(
            self.gateway.as_ref(),
            &Query::table("tasks")
                .eq("created_by", self.user_id)
                .neq("status", TaskStatus::Done)
                .gte("due_date", from)
                .lte("due_date", until)
                .order_by("due_date", true),
        )
        .await?;
        if tasks.is_empty() {
            return Ok(0);
        }

        let notified = self.links_since_midnight(now).await?;
        let fresh: Vec<NewNotification> = tasks
            .iter()
            .filter(|task| !notified.contains(&task_link(task.id)))
            .filter_map(|task| {
                task.due_date
                    .map(|due| due_task_notification(self.user_id, task, due, now))
            })
            .collect();
        debug!(
            user_id = %self.user_id,
            due = tasks.len(),
            fresh = fresh.len(),
            "due task reminders evaluated"
        );
        Ok(self.notifications.add(fresh).await?.len())
    }

    /// Creates a "streak broken" notification for each active habit that was
    /// scheduled yesterday, has no log for yesterday and had a run longer than
    /// one day going into it. Habits without target days are never checked.
    pub async fn check_habit_streaks(
        &self,
        now: DateTime<FixedOffset>,
    ) -> Result<usize, PilotError> {
        let Some(yesterday) = now.date_naive().pred_opt() else {
            return Ok(0);
        };
        let habits: Vec<Habit> = gateway::fetch(
            self.gateway.as_ref(),
            &Query::table("habits")
                .eq("user_id", self.user_id)
                .eq("is_active", true),
        )
        .await?;
        let candidates: Vec<&Habit> = habits
            .iter()
            .filter(|habit| habit.is_scheduled_for(yesterday))
            .collect();
        if candidates.is_empty() {
            return Ok(0);
        }

        let since = yesterday
            .checked_sub_days(Days::new(u64::from(self.streak_window_days)))
            .unwrap_or(NaiveDate::MIN);
        let logs: Vec<HabitLog> = gateway::fetch(
            self.gateway.as_ref(),
            &Query::table("habit_logs")
                .eq("user_id", self.user_id)
                .gte("logged_date", since)
                .lte("logged_date", yesterday),
        )
        .await?;
        let mut by_habit: HashMap<Uuid, BTreeSet<NaiveDate>> = HashMap::new();
        for log in logs {
            by_habit.entry(log.habit_id).or_default().insert(log.logged_date);
        }

        let broken: Vec<&Habit> = candidates
            .into_iter()
            .filter(|habit| {
                let empty = BTreeSet::new();
                let logs = by_habit.get(&habit.id).unwrap_or(&empty);
                !logs.contains(&yesterday) && streak_before(habit, logs, yesterday) > 1
            })
            .collect();
        if broken.is_empty() {
            return Ok(0);
        }

        let notified = self.links_since_midnight(now).await?;
        let fresh: Vec<NewNotification> = broken
            .into_iter()
            .filter(|habit| !notified.contains(&habit_link(habit.id)))
            .map(|habit| streak_broken_notification(self.user_id, habit))
            .collect();
        Ok(self.notifications.add(fresh).await?.len())
    }
}

/// Run alive going into `missed`: the recomputed run ending the day before,
/// or the stored counter when history does not reach back far enough.
fn streak_before(habit: &Habit, logs: &BTreeSet<NaiveDate>, missed: NaiveDate) -> u32 {
    let recomputed = missed
        .pred_opt()
        .map_or(0, |day| streak::run_ending(habit, logs, day));
    let stored = u32::try_from(habit.streak).unwrap_or(0);
    recomputed.max(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn task(title: &str) -> Task {
        serde_json::from_value(serde_json::json!({
            "id": Uuid::new_v4(),
            "title": title,
            "created_by": Uuid::new_v4(),
            "created_at": Utc::now(),
        }))
        .unwrap()
    }

    #[test]
    fn wording_follows_due_time() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = offset.with_ymd_and_hms(2026, 10, 18, 20, 0, 0).unwrap();
        let t = task("Write proposal");
        let user = Uuid::new_v4();

        let today = due_task_notification(user, &t, now.to_utc() + TimeDelta::hours(2), now);
        assert_eq!(today.title, "📅 Task due soon");
        assert_eq!(today.body.as_deref(), Some("\"Write proposal\" is due today"));
        assert_eq!(today.link, Some(task_link(t.id)));

        let tomorrow = due_task_notification(user, &t, now.to_utc() + TimeDelta::hours(5), now);
        assert_eq!(tomorrow.body.as_deref(), Some("\"Write proposal\" is due tomorrow"));

        let late = due_task_notification(user, &t, now.to_utc() - TimeDelta::minutes(1), now);
        assert_eq!(late.title, "⚠️ Task overdue");
        assert_eq!(late.body.as_deref(), Some("\"Write proposal\" is overdue"));
    }

    #[test]
    fn midnight_is_local() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let now = offset.with_ymd_and_hms(2026, 10, 18, 1, 30, 0).unwrap();
        assert_eq!(
            local_midnight(now),
            Utc.with_ymd_and_hms(2026, 10, 18, 5, 0, 0).unwrap()
        );
    }
}
