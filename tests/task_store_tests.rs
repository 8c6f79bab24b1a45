use chrono::{Duration, Utc};
use planpilot::gateway::{Gateway, MemoryGateway, Op};
use planpilot::store::TaskStore;
use planpilot_schema::{NewTask, Priority, TaskStatus};
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

fn store() -> (MemoryGateway, TaskStore, Uuid) {
    let gateway = MemoryGateway::new();
    let user_id = Uuid::new_v4();
    let shared: Arc<dyn Gateway> = Arc::new(gateway.clone());
    (gateway, TaskStore::new(shared, user_id), user_id)
}

async fn seed_tasks(gateway: &MemoryGateway, user_id: Uuid, titles: &[&str]) -> Vec<Uuid> {
    let rows: Vec<Value> = titles
        .iter()
        .enumerate()
        .map(|(i, title)| {
            json!({
                "id": Uuid::new_v4(),
                "title": title,
                "created_by": user_id,
                "sort_order": i,
            })
        })
        .collect();
    gateway
        .seed("tasks", rows)
        .await
        .iter()
        .filter_map(|row| row["id"].as_str().and_then(|id| id.parse().ok()))
        .collect()
}

fn sort_order_of(rows: &[Value], id: Uuid) -> Option<i64> {
    rows.iter()
        .find(|row| row["id"] == json!(id))
        .and_then(|row| row["sort_order"].as_i64())
}

#[tokio::test]
async fn toggling_twice_restores_status_and_completion() {
    let (gateway, tasks, user_id) = store();
    let ids = seed_tasks(&gateway, user_id, &["Laundry"]).await;
    tasks.fetch_all().await.expect("fetch failed");

    let before = tasks.get(ids[0]).expect("task cached");
    let done = tasks.toggle_status(ids[0]).await.expect("first toggle failed");
    assert_eq!(done.status, TaskStatus::Done);
    assert!(done.completed_at.is_some());

    tasks.toggle_status(ids[0]).await.expect("second toggle failed");
    let after = tasks.get(ids[0]).expect("task cached");
    assert_eq!(after.status, before.status);
    assert_eq!(after.completed_at, before.completed_at);

    let stored = gateway.rows("tasks").await;
    assert_eq!(stored[0]["status"], json!("todo"));
    assert_eq!(stored[0]["completed_at"], Value::Null);
}

#[tokio::test]
async fn failed_toggle_leaves_the_cache_as_it_was() {
    let (gateway, tasks, user_id) = store();
    let ids = seed_tasks(&gateway, user_id, &["Taxes"]).await;
    tasks.fetch_all().await.expect("fetch failed");
    let before = tasks.get(ids[0]).expect("task cached");

    gateway.fail_once(Op::Update, "tasks").await;
    let err = tasks.toggle_status(ids[0]).await.expect_err("toggle should fail");
    assert_eq!(err.user_message(), planpilot::error::GENERIC_USER_MESSAGE);

    let after = tasks.get(ids[0]).expect("task cached");
    assert_eq!(after, before);
    assert_eq!(after.status, TaskStatus::Todo);
    assert!(tasks.snapshot().error.is_some());
}

#[tokio::test]
async fn moving_last_task_first_renumbers_in_one_batch() {
    let (gateway, tasks, user_id) = store();
    let ids = seed_tasks(&gateway, user_id, &["A", "B", "C"]).await;
    tasks.fetch_all().await.expect("fetch failed");

    tasks.move_task(2, 0).await.expect("reorder failed");

    let titles: Vec<String> = tasks.tasks().into_iter().map(|t| t.title).collect();
    assert_eq!(titles, ["C", "A", "B"]);

    let rows = gateway.rows("tasks").await;
    assert_eq!(sort_order_of(&rows, ids[2]), Some(0));
    assert_eq!(sort_order_of(&rows, ids[0]), Some(1));
    assert_eq!(sort_order_of(&rows, ids[1]), Some(2));
    assert_eq!(gateway.calls(Op::Update, "tasks").await, 1);
}

#[tokio::test]
async fn partial_reorder_keeps_persisted_order_consistent() {
    let (gateway, tasks, user_id) = store();
    let ids = seed_tasks(&gateway, user_id, &["A", "B", "C"]).await;
    tasks.fetch_all().await.expect("fetch failed");

    tasks.reorder(&[ids[2]]).await.expect("reorder failed");

    let cached: Vec<(String, i64)> = tasks
        .tasks()
        .into_iter()
        .map(|t| (t.title, t.sort_order))
        .collect();
    assert_eq!(
        cached,
        [("C".to_string(), 0), ("A".to_string(), 1), ("B".to_string(), 2)]
    );

    let rows = gateway.rows("tasks").await;
    assert_eq!(sort_order_of(&rows, ids[2]), Some(0));
    assert_eq!(sort_order_of(&rows, ids[0]), Some(1));
    assert_eq!(sort_order_of(&rows, ids[1]), Some(2));
    assert_eq!(gateway.calls(Op::Update, "tasks").await, 1);

    tasks.fetch_all().await.expect("refetch failed");
    let titles: Vec<String> = tasks.tasks().into_iter().map(|t| t.title).collect();
    assert_eq!(titles, ["C", "A", "B"]);
}

#[tokio::test]
async fn failed_reorder_keeps_previous_order_everywhere() {
    let (gateway, tasks, user_id) = store();
    let ids = seed_tasks(&gateway, user_id, &["A", "B", "C"]).await;
    tasks.fetch_all().await.expect("fetch failed");

    gateway.fail_once(Op::Update, "tasks").await;
    assert!(tasks.reorder(&[ids[2], ids[0], ids[1]]).await.is_err());

    let titles: Vec<String> = tasks.tasks().into_iter().map(|t| t.title).collect();
    assert_eq!(titles, ["A", "B", "C"]);
    let rows = gateway.rows("tasks").await;
    assert_eq!(sort_order_of(&rows, ids[2]), Some(2));
}

#[tokio::test]
async fn delete_is_visible_before_the_remote_call_returns() {
    let (gateway, tasks, user_id) = store();
    let ids = seed_tasks(&gateway, user_id, &["Groceries", "Dentist"]).await;
    tasks.fetch_all().await.expect("fetch failed");

    let mut gate = gateway.hold(Op::Delete, "tasks").await;
    let pending = tokio::spawn({
        let tasks = tasks.clone();
        let id = ids[0];
        async move { tasks.delete(id).await }
    });
    gate.entered().await;
    assert!(tasks.get(ids[0]).is_none());
    assert_eq!(tasks.tasks().len(), 1);

    gate.release();
    pending.await.expect("task panicked").expect("delete failed");
    assert!(tasks.get(ids[0]).is_none());
    assert_eq!(gateway.rows("tasks").await.len(), 1);
}

#[tokio::test]
async fn failed_delete_brings_the_task_back_in_place() {
    let (gateway, tasks, user_id) = store();
    let ids = seed_tasks(&gateway, user_id, &["A", "B", "C"]).await;
    tasks.fetch_all().await.expect("fetch failed");

    gateway.fail_once(Op::Delete, "tasks").await;
    assert!(tasks.delete(ids[1]).await.is_err());

    let titles: Vec<String> = tasks.tasks().into_iter().map(|t| t.title).collect();
    assert_eq!(titles, ["A", "B", "C"]);
}

#[tokio::test]
async fn blank_title_is_rejected_without_a_round_trip() {
    let (gateway, tasks, user_id) = store();
    let err = tasks
        .create(NewTask::new("   ", user_id))
        .await
        .expect_err("blank title accepted");
    assert_eq!(err.user_message(), "Task title is required");
    assert_eq!(gateway.calls(Op::Insert, "tasks").await, 0);
}

#[tokio::test]
async fn new_task_lists_top_level_and_toggles_completion() {
    let (gateway, tasks, user_id) = store();
    let tomorrow = Utc::now() + Duration::days(1);

    let mut input = NewTask::new("Write proposal", user_id);
    input.priority = Priority::High;
    input.due_date = Some(tomorrow);
    input.subtasks = vec!["Outline".to_string(), "  ".to_string()];
    let created = tasks.create(input).await.expect("create failed");

    let listed = tasks.tasks();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, created.id);
    assert_eq!(listed[0].priority, Priority::High);
    assert!(listed.iter().all(|t| t.parent_id.is_none()));

    let subtasks = tasks.fetch_subtasks(created.id).await.expect("subtasks failed");
    assert_eq!(subtasks.len(), 1);
    assert_eq!(subtasks[0].title, "Outline");
    assert!(subtasks.iter().all(|s| s.id != created.id));
    assert_eq!(gateway.rows("tasks").await.len(), 2);

    let done = tasks.toggle_status(created.id).await.expect("toggle failed");
    assert_eq!(done.status, TaskStatus::Done);
    assert!(done.completed_at.is_some());

    let undone = tasks.toggle_status(created.id).await.expect("toggle failed");
    assert_eq!(undone.status, TaskStatus::Todo);
    assert!(undone.completed_at.is_none());
}
