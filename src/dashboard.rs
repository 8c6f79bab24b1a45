//! Queries behind the dashboard widgets.

use chrono::{DateTime, Days, FixedOffset, Utc};
use planpilot_schema::{Task, TaskStatus};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::PilotError;
use crate::gateway::{self, Gateway, Query};

pub const UPCOMING_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardCounts {
    pub completed_today: usize,
    pub pending: usize,
    pub total_completed: usize,
}

/// Local day containing `now` as a half-open UTC range.
fn local_day(now: DateTime<FixedOffset>) -> (DateTime<Utc>, DateTime<Utc>) {
    let offset = *now.offset();
    let start = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|t| t.and_local_timezone(offset).single())
        .map_or_else(|| now.to_utc(), |t| t.to_utc());
    let end = start
        .checked_add_days(Days::new(1))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    (start, end)
}

fn top_level(user_id: Uuid) -> Query {
    Query::table("tasks")
        .eq("created_by", user_id)
        .is_null("parent_id")
}

/// Top-level tasks due today, then undated ones created today.
pub async fn today_tasks(
    gateway: &dyn Gateway,
    user_id: Uuid,
    now: DateTime<FixedOffset>,
) -> Result<Vec<Task>, PilotError> {
    let (start, end) = local_day(now);
    let mut tasks: Vec<Task> = gateway::fetch(
        gateway,
        &top_level(user_id)
            .gte("due_date", start)
            .lt("due_date", end)
            .order_by("sort_order", true),
    )
    .await?;
    let created: Vec<Task> = gateway::fetch(
        gateway,
        &top_level(user_id)
            .is_null("due_date")
            .gte("created_at", start)
            .lt("created_at", end)
            .order_by("sort_order", true),
    )
    .await?;

    let seen: HashSet<Uuid> = tasks.iter().map(|t| t.id).collect();
    tasks.extend(created.into_iter().filter(|t| !seen.contains(&t.id)));
    Ok(tasks)
}

/// Earliest dated top-level tasks that are still open.
pub async fn upcoming_tasks(gateway: &dyn Gateway, user_id: Uuid) -> Result<Vec<Task>, PilotError> {
    let tasks = gateway::fetch(
        gateway,
        &top_level(user_id)
            .neq("status", TaskStatus::Done)
            .neq("status", TaskStatus::Cancelled)
            .not_null("due_date")
            .order_by("due_date", true)
            .limit(UPCOMING_LIMIT),
    )
    .await?;
    Ok(tasks)
}

pub async fn counts(
    gateway: &dyn Gateway,
    user_id: Uuid,
    now: DateTime<FixedOffset>,
) -> Result<DashboardCounts, PilotError> {
    let (start, end) = local_day(now);
    let done = Query::table("tasks")
        .eq("created_by", user_id)
        .eq("status", TaskStatus::Done);
    let completed_today_q = done.clone().gte("completed_at", start).lt("completed_at", end);
    let pending_q = top_level(user_id).eq("status", TaskStatus::Todo);

    let (completed_today, pending, total_completed) = tokio::try_join!(
        gateway.count(&completed_today_q),
        gateway.count(&pending_q),
        gateway.count(&done),
    )?;
    Ok(DashboardCounts {
        completed_today,
        pending,
        total_completed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use chrono::{TimeDelta, TimeZone};
    use serde_json::json;

    #[tokio::test]
    async fn today_upcoming_and_counts() {
        let gw = MemoryGateway::new();
        let user = Uuid::new_v4();
        let now = Utc::now().fixed_offset();
        let (start, _) = local_day(now);
        let later_today = start + TimeDelta::hours(23);
        let next_week = start + TimeDelta::days(7);

        gw.seed(
            "tasks",
            vec![
                json!({ "title": "due today", "created_by": user, "due_date": later_today }),
                json!({ "title": "undated", "created_by": user }),
                json!({ "title": "next week", "created_by": user, "due_date": next_week }),
                json!({ "title": "finished", "created_by": user, "due_date": next_week,
                        "status": "done", "completed_at": now.to_utc() }),
                json!({ "title": "someone else", "created_by": Uuid::new_v4(), "due_date": later_today }),
            ],
        )
        .await;

        let today: Vec<String> = today_tasks(&gw, user, now)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(today, vec!["due today", "undated"]);

        let upcoming: Vec<String> = upcoming_tasks(&gw, user)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(upcoming, vec!["due today", "next week"]);

        let counts = counts(&gw, user, now).await.unwrap();
        assert_eq!(
            counts,
            DashboardCounts {
                completed_today: 1,
                pending: 3,
                total_completed: 1,
            }
        );
    }

    #[test]
    fn local_day_respects_offset() {
        let now = FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 18, 3, 0, 0)
            .unwrap();
        let (start, end) = local_day(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 10, 17, 15, 0, 0).unwrap());
        assert_eq!(end - start, TimeDelta::days(1));
    }
}
