use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Weekdays a new habit is scheduled on when the user picks none: Monday to Friday.
pub const DEFAULT_TARGET_DAYS: [u8; 5] = [1, 2, 3, 4, 5];

/// One row of `habits`.
///
/// `target_days` uses Sunday-based numbering (0 = Sunday .. 6 = Saturday).
/// `streak` and `best_streak` are stored counters maintained server-side; the
/// client recomputes both from `habit_logs` instead of trusting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Habit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub streak: i32,
    #[serde(default)]
    pub best_streak: i32,
    #[serde(default)]
    pub target_days: Vec<u8>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Habit {
    pub fn is_scheduled_on(&self, weekday: Weekday) -> bool {
        // num_days_from_sunday is at most 6
        #[allow(clippy::cast_possible_truncation)]
        let day = weekday.num_days_from_sunday() as u8;
        self.target_days.contains(&day)
    }

    pub fn is_scheduled_for(&self, date: NaiveDate) -> bool {
        self.is_scheduled_on(date.weekday())
    }
}

/// One row of `habit_logs`: the habit was completed on `logged_date`.
/// `(habit_id, user_id, logged_date)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HabitLog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub habit_id: Uuid,
    pub user_id: Uuid,
    pub logged_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewHabit {
    pub user_id: Uuid,
    pub name: String,
    pub icon: String,
    pub color: String,
    pub frequency: String,
    pub target_days: Vec<u8>,
}

impl NewHabit {
    pub fn new(user_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
            icon: "⭐".to_string(),
            color: "#6366f1".to_string(),
            frequency: "custom".to_string(),
            target_days: DEFAULT_TARGET_DAYS.to_vec(),
        }
    }
}
