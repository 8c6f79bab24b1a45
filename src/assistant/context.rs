use chrono::{DateTime, FixedOffset};
use planpilot_schema::Task;
use std::fmt::Write as _;

use crate::store::TrackedHabit;

/// Pending tasks listed in the prompt.
pub const MAX_PENDING_IN_CONTEXT: usize = 15;

const INSTRUCTIONS: &str = "INSTRUCTIONS:
- Be concise, warm, and actionable
- Use **bold** for task names and key points
- Use numbered lists for steps or plans
- Keep responses under 250 words unless a detailed breakdown is needed
- Always end with 1 encouraging sentence";

/// System prompt describing the user's tasks and habits as of `now`.
pub fn build_context(tasks: &[Task], habits: &[TrackedHabit], now: DateTime<FixedOffset>) -> String {
    let now_utc = now.to_utc();
    let today = now.date_naive();
    let mut out = String::new();

    let _ = writeln!(
        out,
        "You are an AI productivity assistant inside PlanPilot, a task management app."
    );
    let _ = writeln!(out, "Today is {}.", today.format("%A, %B %-d %Y"));

    out.push_str("\nUSER'S PENDING TASKS:\n");
    let pending: Vec<&Task> = tasks
        .iter()
        .filter(|t| !t.status.is_done())
        .take(MAX_PENDING_IN_CONTEXT)
        .collect();
    if pending.is_empty() {
        out.push_str("No pending tasks\n");
    }
    for task in pending {
        let _ = write!(
            out,
            "- \"{}\" [{}] [{}]",
            task.title,
            task.priority.as_str(),
            task.status.as_str()
        );
        if let Some(due) = task.due_date {
            let _ = write!(out, " due {}", due.with_timezone(now.offset()).format("%b %-d"));
        }
        out.push('\n');
    }

    let done = tasks.iter().filter(|t| t.status.is_done()).count();
    let overdue: Vec<String> = tasks
        .iter()
        .filter(|t| t.is_overdue(now_utc))
        .map(|t| format!("\"{}\"", t.title))
        .collect();
    let _ = writeln!(out, "\nCOMPLETED TASKS: {done} total");
    let _ = writeln!(
        out,
        "OVERDUE: {}",
        if overdue.is_empty() {
            "none".to_string()
        } else {
            overdue.join(", ")
        }
    );

    out.push_str("\nUSER'S HABITS:\n");
    if habits.is_empty() {
        out.push_str("No habits yet\n");
    }
    for tracked in habits {
        let _ = writeln!(
            out,
            "- \"{}\" ({} day streak)",
            tracked.habit.name,
            tracked.streak(today)
        );
    }

    out.push('\n');
    out.push_str(INSTRUCTIONS);
    out
}
