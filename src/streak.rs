//! Habit streaks recomputed from `habit_logs` history.
//!
//! A streak counts logged days walking backwards. Days the habit is not scheduled
//! on never break it; a scheduled day without a log does. Today not being logged
//! yet does not break the streak either. A habit with no target days counts
//! every day as scheduled.

use chrono::{Days, NaiveDate};
use planpilot_schema::Habit;
use std::collections::BTreeSet;

/// Whether `day` counts towards the streak of `habit`.
pub fn scheduled(habit: &Habit, day: NaiveDate) -> bool {
    habit.target_days.is_empty() || habit.is_scheduled_for(day)
}

/// Length of the run ending on `end` (inclusive). Zero when `end` is scheduled but unlogged.
pub fn run_ending(habit: &Habit, logs: &BTreeSet<NaiveDate>, end: NaiveDate) -> u32 {
    let Some(first) = logs.first().copied() else {
        return 0;
    };
    let mut count = 0;
    let mut day = end;
    while day >= first {
        if logs.contains(&day) {
            count += 1;
        } else if scheduled(habit, day) {
            break;
        }
        match day.checked_sub_days(Days::new(1)) {
            Some(prev) => day = prev,
            None => break,
        }
    }
    count
}

/// Streak as seen on `today`.
pub fn current_streak(habit: &Habit, logs: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    if logs.contains(&today) {
        return run_ending(habit, logs, today);
    }
    today
        .pred_opt()
        .map_or(0, |yesterday| run_ending(habit, logs, yesterday))
}

/// Longest run anywhere in `logs`.
pub fn best_streak(habit: &Habit, logs: &BTreeSet<NaiveDate>) -> u32 {
    let (Some(first), Some(last)) = (logs.first().copied(), logs.last().copied()) else {
        return 0;
    };
    let mut best = 0;
    let mut run = 0;
    for day in first.iter_days().take_while(|d| *d <= last) {
        if logs.contains(&day) {
            run += 1;
            best = best.max(run);
        } else if scheduled(habit, day) {
            run = 0;
        }
    }
    best
}

/// Logged days within the `days` days ending on `today`.
pub fn completed_within(logs: &BTreeSet<NaiveDate>, today: NaiveDate, days: u32) -> usize {
    let start = today
        .checked_sub_days(Days::new(u64::from(days.saturating_sub(1))))
        .unwrap_or(NaiveDate::MIN);
    logs.range(start..=today).count()
}

/// `days` cells ending on `today`, oldest first: (date, logged).
pub fn heat_strip(logs: &BTreeSet<NaiveDate>, today: NaiveDate, days: u32) -> Vec<(NaiveDate, bool)> {
    (0..days)
        .rev()
        .filter_map(|back| today.checked_sub_days(Days::new(u64::from(back))))
        .map(|day| (day, logs.contains(&day)))
        .collect()
}
