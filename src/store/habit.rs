use chrono::{Days, NaiveDate};
use planpilot_schema::{Habit, HabitLog, NewHabit};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Keyed, Snapshot, StoreCell};
use crate::config::HabitsConfig;
use crate::error::PilotError;
use crate::gateway::{self, Gateway, Query};
use crate::streak;

/// Icons offered by the habit form.
pub const HABIT_ICONS: [&str; 15] = [
    "⭐", "🔥", "💪", "📚", "🧘", "🏃", "💧", "🥗", "😴", "🎯", "✍️", "🎵", "🧠", "❤️", "🌱",
];

/// Accent colors offered by the habit form.
pub const HABIT_COLORS: [&str; 8] = [
    "#6366f1", "#0ea5e9", "#10b981", "#f59e0b", "#ef4444", "#ec4899", "#8b5cf6", "#14b8a6",
];

/// A habit with the days it was logged on.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedHabit {
    pub habit: Habit,
    pub logs: BTreeSet<NaiveDate>,
}

impl Keyed for TrackedHabit {
    fn key(&self) -> Uuid {
        self.habit.id
    }
}

impl TrackedHabit {
    pub fn checked_on(&self, day: NaiveDate) -> bool {
        self.logs.contains(&day)
    }

    pub fn streak(&self, today: NaiveDate) -> u32 {
        streak::current_streak(&self.habit, &self.logs, today)
    }

    /// Longest run seen, never below the stored counter.
    pub fn best_streak(&self) -> u32 {
        let stored = u32::try_from(self.habit.best_streak).unwrap_or(0);
        streak::best_streak(&self.habit, &self.logs).max(stored)
    }

    pub fn completed_this_week(&self, today: NaiveDate) -> usize {
        streak::completed_within(&self.logs, today, 7)
    }

    pub fn heat_strip(&self, today: NaiveDate, days: u32) -> Vec<(NaiveDate, bool)> {
        streak::heat_strip(&self.logs, today, days)
    }
}

/// Summary pills above the habit list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HabitStats {
    pub today_completed: usize,
    pub today_total: usize,
    pub best_streak: u32,
    pub total_checkins: usize,
}

/// Active habits of one user with their recent logs.
#[derive(Clone)]
pub struct HabitStore {
    gateway: Arc<dyn Gateway>,
    user_id: Uuid,
    config: HabitsConfig,
    cell: StoreCell<TrackedHabit>,
}

impl HabitStore {
    pub fn new(gateway: Arc<dyn Gateway>, user_id: Uuid, config: HabitsConfig) -> Self {
        Self {
            gateway,
            user_id,
            config,
            cell: StoreCell::new(),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn habits(&self) -> Vec<TrackedHabit> {
        self.cell.items()
    }

    pub fn get(&self, id: Uuid) -> Option<TrackedHabit> {
        self.cell.get(id)
    }

    pub fn snapshot(&self) -> Snapshot<TrackedHabit> {
        self.cell.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot<TrackedHabit>> {
        self.cell.subscribe()
    }

    pub async fn fetch_all(&self, today: NaiveDate) -> Result<(), PilotError> {
        self.cell.set_loading();
        match self.load(today).await {
            Ok(habits) => {
                debug!(user_id = %self.user_id, count = habits.len(), "habits fetched");
                self.cell.finish_load(Ok(habits));
                Ok(())
            }
            Err(err) => {
                warn!(user_id = %self.user_id, error = %err, "habit fetch failed");
                self.cell.finish_load(Err(&err));
                Err(err)
            }
        }
    }

    async fn load(&self, today: NaiveDate) -> Result<Vec<TrackedHabit>, PilotError> {
        let gw = self.gateway.as_ref();
        let habits: Vec<Habit> = gateway::fetch(
            gw,
            &Query::table("habits")
                .eq("user_id", self.user_id)
                .eq("is_active", true)
                .order_by("created_at", true),
        )
        .await?;

        let since = today
            .checked_sub_days(Days::new(u64::from(self.config.load_days() - 1)))
            .unwrap_or(NaiveDate::MIN);
        let logs: Vec<HabitLog> = gateway::fetch(
            gw,
            &Query::table("habit_logs")
                .eq("user_id", self.user_id)
                .gte("logged_date", since),
        )
        .await?;

        let mut by_habit: HashMap<Uuid, BTreeSet<NaiveDate>> = HashMap::new();
        for log in logs {
            by_habit.entry(log.habit_id).or_default().insert(log.logged_date);
        }
        Ok(habits
            .into_iter()
            .map(|habit| {
                let logs = by_habit.remove(&habit.id).unwrap_or_default();
                TrackedHabit { habit, logs }
            })
            .collect())
    }

    pub async fn create(&self, input: NewHabit) -> Result<Habit, PilotError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(PilotError::validation("Habit name is required"));
        }
        if input.target_days.iter().any(|d| *d > 6) {
            return Err(PilotError::validation(
                "Weekdays run from 0 (Sunday) to 6 (Saturday)",
            ));
        }
        let mut target_days = input.target_days.clone();
        target_days.sort_unstable();
        target_days.dedup();

        let id = Uuid::new_v4();
        let mut row = serde_json::to_value(NewHabit {
            name: name.to_string(),
            target_days,
            ..input
        })?;
        if let Some(fields) = row.as_object_mut() {
            fields.insert("id".to_string(), json!(id));
        }

        let result = self.gateway.insert("habits", vec![row]).await;
        let stored = self.cell.settle("create habit", None, result)?;
        let habit = gateway::decode_rows::<Habit>(stored)?
            .into_iter()
            .next()
            .ok_or_else(|| PilotError::not_found("habit", id))?;
        self.cell.upsert(TrackedHabit {
            habit: habit.clone(),
            logs: BTreeSet::new(),
        });
        Ok(habit)
    }

    /// Deletes the habit; its logs go with it server-side.
    pub async fn delete(&self, id: Uuid) -> Result<(), PilotError> {
        let undo = self.cell.remove(id);
        let result = self
            .gateway
            .delete(&Query::table("habits").eq("id", id))
            .await;
        self.cell.settle("delete habit", undo, result)?;
        Ok(())
    }

    /// Checks or unchecks `today`; returns whether the habit is now checked.
    pub async fn toggle_today(&self, id: Uuid, today: NaiveDate) -> Result<bool, PilotError> {
        let tracked = self
            .cell
            .get(id)
            .ok_or_else(|| PilotError::not_found("habit", id))?;
        let checked = !tracked.checked_on(today);

        let undo = self.cell.update_with(id, |t| {
            if checked {
                t.logs.insert(today);
            } else {
                t.logs.remove(&today);
            }
        });

        let result = if checked {
            let log = HabitLog {
                id: None,
                habit_id: id,
                user_id: self.user_id,
                logged_date: today,
            };
            match serde_json::to_value(&log) {
                Ok(row) => self.gateway.insert("habit_logs", vec![row]).await.map(|_| ()),
                Err(err) => Err(err.into()),
            }
        } else {
            self.gateway
                .delete(
                    &Query::table("habit_logs")
                        .eq("habit_id", id)
                        .eq("user_id", self.user_id)
                        .eq("logged_date", today),
                )
                .await
                .map(|_| ())
        };
        self.cell.settle("toggle habit", undo, result)?;
        Ok(checked)
    }

    pub fn stats(&self, today: NaiveDate) -> HabitStats {
        let habits = self.cell.items();
        HabitStats {
            today_completed: habits.iter().filter(|h| h.checked_on(today)).count(),
            today_total: habits.len(),
            best_streak: habits.iter().map(TrackedHabit::best_streak).max().unwrap_or(0),
            total_checkins: habits.iter().map(|h| h.logs.len()).sum(),
        }
    }

    /// Heat strip width configured for this store.
    pub fn history_days(&self) -> u32 {
        self.config.history_days
    }

    pub fn clear(&self) {
        self.cell.clear();
    }
}
