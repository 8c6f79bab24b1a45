use serde::{Deserialize, Serialize};

/// Reminder/streak evaluator settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RemindersConfig {
    /// Re-run period in seconds. Unset runs the checks once per session start.
    /// TOML: `reminders.interval_secs`.
    #[serde(default)]
    pub interval_secs: Option<u64>,

    /// How far ahead a due date triggers a reminder.
    /// TOML: `reminders.due_window_hours`. Default: `24`.
    #[serde(default = "default_due_window_hours")]
    pub due_window_hours: i64,
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            interval_secs: None,
            due_window_hours: default_due_window_hours(),
        }
    }
}

fn default_due_window_hours() -> i64 {
    24
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HabitsConfig {
    /// Days of `habit_logs` history kept in the habit store (heat strip width).
    /// TOML: `habits.history_days`. Default: `14`.
    #[serde(default = "default_history_days")]
    pub history_days: u32,

    /// Days of `habit_logs` loaded to recompute streaks.
    /// TOML: `habits.streak_window_days`. Default: `90`.
    #[serde(default = "default_streak_window_days")]
    pub streak_window_days: u32,
}

impl HabitsConfig {
    /// Days of logs a fetch has to cover.
    pub fn load_days(&self) -> u32 {
        self.history_days.max(self.streak_window_days).max(1)
    }
}

impl Default for HabitsConfig {
    fn default() -> Self {
        Self {
            history_days: default_history_days(),
            streak_window_days: default_streak_window_days(),
        }
    }
}

fn default_history_days() -> u32 {
    14
}

fn default_streak_window_days() -> u32 {
    90
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationsConfig {
    /// Newest notifications loaded per fetch.
    /// TOML: `notifications.page_size`. Default: `30`.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> usize {
    30
}
