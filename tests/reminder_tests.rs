use chrono::{Days, Duration, Local, Utc};
use planpilot::config::{HabitsConfig, RemindersConfig};
use planpilot::gateway::{Gateway, MemoryGateway, Op};
use planpilot::reminders::{ReminderEvaluator, ReminderHandle, habit_link, task_link};
use planpilot::store::NotificationStore;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

struct Fixture {
    gateway: MemoryGateway,
    notifications: NotificationStore,
    evaluator: ReminderEvaluator,
    user_id: Uuid,
}

fn fixture() -> Fixture {
    let gateway = MemoryGateway::new();
    let user_id = Uuid::new_v4();
    let shared: Arc<dyn Gateway> = Arc::new(gateway.clone());
    let notifications = NotificationStore::new(Arc::clone(&shared), user_id, 30);
    let evaluator = ReminderEvaluator::new(
        shared,
        notifications.clone(),
        &RemindersConfig::default(),
        &HabitsConfig::default(),
    );
    Fixture {
        gateway,
        notifications,
        evaluator,
        user_id,
    }
}

fn every_day() -> Value {
    json!([0, 1, 2, 3, 4, 5, 6])
}

#[tokio::test]
async fn task_due_soon_is_reminded_once_per_day() {
    let fx = fixture();
    let now = Local::now().fixed_offset();
    let id = Uuid::new_v4();
    fx.gateway
        .seed(
            "tasks",
            vec![json!({
                "id": id,
                "title": "Submit report",
                "created_by": fx.user_id,
                "due_date": Utc::now() + Duration::hours(2),
            })],
        )
        .await;

    let created = fx.evaluator.check_due_task_reminders(now).await.expect("check failed");
    assert_eq!(created, 1);
    let rows = fx.gateway.rows("notifications").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["link"], json!(task_link(id)));
    assert_eq!(rows[0]["title"], json!("📅 Task due soon"));
    assert_eq!(fx.notifications.notifications().len(), 1);

    let again = fx.evaluator.check_due_task_reminders(now).await.expect("check failed");
    assert_eq!(again, 0);
    assert_eq!(fx.gateway.rows("notifications").await.len(), 1);
}

#[tokio::test]
async fn done_and_distant_tasks_are_ignored() {
    let fx = fixture();
    fx.gateway
        .seed(
            "tasks",
            vec![
                json!({
                    "title": "Finished",
                    "created_by": fx.user_id,
                    "status": "done",
                    "due_date": Utc::now() + Duration::hours(1),
                }),
                json!({
                    "title": "Next week",
                    "created_by": fx.user_id,
                    "due_date": Utc::now() + Duration::days(7),
                }),
                json!({
                    "title": "Someone else's",
                    "created_by": Uuid::new_v4(),
                    "due_date": Utc::now() + Duration::hours(1),
                }),
            ],
        )
        .await;

    let report = fx.evaluator.run(Local::now().fixed_offset()).await;
    assert_eq!(report.due_tasks, 0);
    assert!(fx.gateway.rows("notifications").await.is_empty());
}

#[tokio::test]
async fn missed_day_breaks_a_running_streak_once() {
    let fx = fixture();
    let now = Local::now().fixed_offset();
    let habit_id = Uuid::new_v4();
    fx.gateway
        .seed(
            "habits",
            vec![json!({
                "id": habit_id,
                "user_id": fx.user_id,
                "name": "Read",
                "streak": 3,
                "target_days": every_day(),
            })],
        )
        .await;

    let created = fx.evaluator.check_habit_streaks(now).await.expect("check failed");
    assert_eq!(created, 1);
    let rows = fx.gateway.rows("notifications").await;
    assert_eq!(rows[0]["link"], json!(habit_link(habit_id)));
    assert_eq!(rows[0]["title"], json!("🔥 Streak broken"));
    assert_eq!(
        rows[0]["body"],
        json!("You missed \"Read\" yesterday. Start a new streak today!")
    );

    let again = fx.evaluator.check_habit_streaks(now).await.expect("check failed");
    assert_eq!(again, 0);
    assert_eq!(fx.gateway.rows("notifications").await.len(), 1);
}

#[tokio::test]
async fn habit_without_target_days_never_breaks() {
    let fx = fixture();
    fx.gateway
        .seed(
            "habits",
            vec![json!({
                "user_id": fx.user_id,
                "name": "Journal",
                "streak": 3,
                "target_days": [],
            })],
        )
        .await;

    let created = fx
        .evaluator
        .check_habit_streaks(Local::now().fixed_offset())
        .await
        .expect("check failed");
    assert_eq!(created, 0);
    assert!(fx.gateway.rows("notifications").await.is_empty());
}

#[tokio::test]
async fn logged_yesterday_keeps_the_streak() {
    let fx = fixture();
    let now = Local::now().fixed_offset();
    let habit_id = Uuid::new_v4();
    let yesterday = now
        .date_naive()
        .checked_sub_days(Days::new(1))
        .expect("date in range");
    fx.gateway
        .seed(
            "habits",
            vec![json!({
                "id": habit_id,
                "user_id": fx.user_id,
                "name": "Read",
                "streak": 3,
                "target_days": every_day(),
            })],
        )
        .await;
    fx.gateway
        .seed(
            "habit_logs",
            vec![json!({
                "habit_id": habit_id,
                "user_id": fx.user_id,
                "logged_date": yesterday,
            })],
        )
        .await;

    let created = fx.evaluator.check_habit_streaks(now).await.expect("check failed");
    assert_eq!(created, 0);
}

#[tokio::test]
async fn streak_of_three_from_history_alone_is_detected() {
    let fx = fixture();
    let now = Local::now().fixed_offset();
    let habit_id = Uuid::new_v4();
    fx.gateway
        .seed(
            "habits",
            vec![json!({
                "id": habit_id,
                "user_id": fx.user_id,
                "name": "Stretch",
                "target_days": every_day(),
            })],
        )
        .await;
    let logs: Vec<Value> = (2..=4)
        .filter_map(|back| now.date_naive().checked_sub_days(Days::new(back)))
        .map(|day| json!({ "habit_id": habit_id, "user_id": fx.user_id, "logged_date": day }))
        .collect();
    fx.gateway.seed("habit_logs", logs).await;

    let created = fx.evaluator.check_habit_streaks(now).await.expect("check failed");
    assert_eq!(created, 1);
}

#[tokio::test]
async fn failing_checks_are_swallowed() {
    let fx = fixture();
    fx.gateway.fail_on(Op::Select, "tasks").await;
    fx.gateway.fail_on(Op::Select, "habits").await;

    let report = fx.evaluator.run(Local::now().fixed_offset()).await;
    assert_eq!(report.due_tasks, 0);
    assert_eq!(report.broken_streaks, 0);
}

#[tokio::test]
async fn actor_evaluates_on_start_and_on_demand() {
    let fx = fixture();
    fx.gateway
        .seed(
            "tasks",
            vec![json!({
                "title": "Call plumber",
                "created_by": fx.user_id,
                "due_date": Utc::now() + Duration::hours(3),
            })],
        )
        .await;

    let handle = ReminderHandle::spawn(fx.evaluator.clone(), None)
        .await
        .expect("spawn failed");
    let first = handle.evaluate_now().await.expect("rpc failed");
    let second = handle.evaluate_now().await.expect("rpc failed");
    assert!(first.due_tasks <= 1);
    assert_eq!(second.due_tasks, 0);
    assert_eq!(fx.gateway.rows("notifications").await.len(), 1);
    handle.stop();
}
