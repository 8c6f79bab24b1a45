use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, future};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{AuthGateway, AuthUser, ChangeEvent, ChangeStream, Filter, Gateway, Query, RowPatch};
use crate::error::GatewayError;

const CHANGE_BUFFER: usize = 256;

/// Foreign keys declared `on delete cascade`: (parent table, child table, child column).
const CASCADES: &[(&str, &str, &str)] = &[
    ("tasks", "tasks", "parent_id"),
    ("tasks", "task_comments", "task_id"),
    ("tasks", "task_tags", "task_id"),
    ("tags", "task_tags", "tag_id"),
    ("habits", "habit_logs", "habit_id"),
    ("workspaces", "workspace_members", "workspace_id"),
    ("workspaces", "tags", "workspace_id"),
];

/// Gateway operation kinds, for failure injection and holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Select,
    Count,
    Insert,
    Update,
    Delete,
    Rpc,
    Subscribe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Always,
    Once,
}

#[derive(Clone)]
struct Hold {
    release: watch::Receiver<bool>,
    entered: Arc<watch::Sender<usize>>,
}

struct Account {
    user: AuthUser,
    password: String,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<Value>>,
    failures: HashMap<(Op, String), Failure>,
    holds: HashMap<(Op, String), Hold>,
    calls: HashMap<(Op, String), usize>,
    accounts: HashMap<String, Account>,
    current: Option<AuthUser>,
}

impl State {
    fn check_failure(&mut self, op: Op, table: &str) -> Result<(), GatewayError> {
        let key = (op, table.to_string());
        match self.failures.get(&key).copied() {
            None => Ok(()),
            Some(failure) => {
                if failure == Failure::Once {
                    self.failures.remove(&key);
                }
                debug!(?op, table, "injected gateway failure");
                Err(GatewayError::Rejected(format!(
                    "injected {op:?} failure on {table}"
                )))
            }
        }
    }

    fn table(&mut self, table: &str) -> &mut Vec<Value> {
        self.tables.entry(table.to_string()).or_default()
    }

    /// Removes rows matching `query` plus everything reachable through `CASCADES`.
    fn delete_cascading(&mut self, query: &Query) -> (Vec<Value>, Vec<(String, ChangeEvent)>) {
        let removed = take_matching(self.table(&query.table), query);
        let mut events: Vec<(String, ChangeEvent)> = removed
            .iter()
            .map(|row| (query.table.clone(), ChangeEvent::Delete(row.clone())))
            .collect();

        let mut frontier = vec![(query.table.clone(), ids_of(&removed))];
        while let Some((parent, ids)) = frontier.pop() {
            if ids.is_empty() {
                continue;
            }
            for (_, child, column) in CASCADES.iter().filter(|(p, _, _)| *p == parent) {
                let child_query = Query::table(child).in_list(column, ids.iter().cloned());
                let gone = take_matching(self.table(child), &child_query);
                if gone.is_empty() {
                    continue;
                }
                events.extend(
                    gone.iter()
                        .map(|row| ((*child).to_string(), ChangeEvent::Delete(row.clone()))),
                );
                frontier.push(((*child).to_string(), ids_of(&gone)));
            }
        }
        (removed, events)
    }

    fn apply_patches(
        &mut self,
        table: &str,
        patches: &[RowPatch],
    ) -> Result<Vec<(String, ChangeEvent)>, GatewayError> {
        let rows = self.table(table);
        for patch in patches {
            if !patch.patch.is_object() {
                return Err(GatewayError::Rejected("patch must be a JSON object".to_string()));
            }
            if !rows.iter().any(|row| id_of(row) == Some(patch.id)) {
                return Err(GatewayError::Rejected(format!(
                    "{table} row {} not found",
                    patch.id
                )));
            }
        }

        let mut events = Vec::with_capacity(patches.len());
        for patch in patches {
            if let Some(row) = rows.iter_mut().find(|row| id_of(row) == Some(patch.id)) {
                let old_record = row.clone();
                merge(row, &patch.patch);
                events.push((
                    table.to_string(),
                    ChangeEvent::Update {
                        record: row.clone(),
                        old_record,
                    },
                ));
            }
        }
        Ok(events)
    }
}

fn take_matching(rows: &mut Vec<Value>, query: &Query) -> Vec<Value> {
    let (gone, kept): (Vec<Value>, Vec<Value>) =
        rows.drain(..).partition(|row| query.matches(row));
    *rows = kept;
    gone
}

fn id_of(row: &Value) -> Option<Uuid> {
    row.get("id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn ids_of(rows: &[Value]) -> Vec<Value> {
    rows.iter().filter_map(|row| row.get("id").cloned()).collect()
}

fn merge(row: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(fields)) = (row, patch) {
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Columns forming a unique key, beyond the primary key.
fn unique_key(table: &str) -> Option<&'static [&'static str]> {
    match table {
        "habit_logs" => Some(&["habit_id", "user_id", "logged_date"]),
        "workspace_members" => Some(&["workspace_id", "user_id"]),
        "task_tags" => Some(&["task_id", "tag_id"]),
        _ => None,
    }
}

fn key_of(row: &Value, columns: &[&str]) -> Vec<Value> {
    columns
        .iter()
        .map(|c| row.get(*c).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Column defaults the hosted schema declares.
fn apply_defaults(table: &str, row: &mut Map<String, Value>, now: DateTime<Utc>) {
    let mut default = |column: &str, value: Value| {
        row.entry(column.to_string()).or_insert(value);
    };
    if table != "task_tags" {
        default("id", json!(Uuid::new_v4()));
    }
    default("created_at", json!(now));
    match table {
        "tasks" => {
            default("status", json!("todo"));
            default("priority", json!("medium"));
            default("sort_order", json!(0));
            default("description", Value::Null);
            default("due_date", Value::Null);
            default("completed_at", Value::Null);
            default("parent_id", Value::Null);
            default("workspace_id", Value::Null);
        }
        "habits" => {
            default("streak", json!(0));
            default("best_streak", json!(0));
            default("is_active", json!(true));
            default("target_days", json!([1, 2, 3, 4, 5]));
        }
        "notifications" => {
            default("is_read", json!(false));
            default("body", Value::Null);
            default("link", Value::Null);
        }
        "workspaces" => {
            default("is_personal", json!(false));
        }
        "workspace_members" => {
            default("role", json!("member"));
        }
        _ => {}
    }
}

/// Parks gateway calls of one (operation, table) until released.
///
/// Dropping the gate without releasing also lets parked calls through.
pub struct Gate {
    release: watch::Sender<bool>,
    entered: watch::Receiver<usize>,
}

impl Gate {
    /// Resolves once at least one call is parked behind the gate.
    pub async fn entered(&mut self) {
        let _ = self.entered.wait_for(|count| *count > 0).await;
    }

    pub fn release(self) {
        let _ = self.release.send(true);
    }
}

/// In-process gateway with the hosted schema's defaults, unique keys and cascades.
///
/// Used by tests and offline runs. Failures can be injected per operation and
/// table, and calls can be held in flight to observe optimistic state.
#[derive(Clone)]
pub struct MemoryGateway {
    state: Arc<Mutex<State>>,
    changes: broadcast::Sender<(String, ChangeEvent)>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            changes,
        }
    }

    /// Inserts rows with defaults applied, bypassing failures, holds and subscribers.
    pub async fn seed(&self, table: &str, rows: Vec<Value>) -> Vec<Value> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let stored: Vec<Value> = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(mut obj) => {
                    apply_defaults(table, &mut obj, now);
                    Some(Value::Object(obj))
                }
                _ => None,
            })
            .collect();
        state.table(table).extend(stored.iter().cloned());
        stored
    }

    pub async fn rows(&self, table: &str) -> Vec<Value> {
        let state = self.state.lock().await;
        state.tables.get(table).cloned().unwrap_or_default()
    }

    pub async fn fail_on(&self, op: Op, table: &str) {
        let mut state = self.state.lock().await;
        state.failures.insert((op, table.to_string()), Failure::Always);
    }

    pub async fn fail_once(&self, op: Op, table: &str) {
        let mut state = self.state.lock().await;
        state.failures.insert((op, table.to_string()), Failure::Once);
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    pub async fn hold(&self, op: Op, table: &str) -> Gate {
        let (release_tx, release_rx) = watch::channel(false);
        let (entered_tx, entered_rx) = watch::channel(0usize);
        let hold = Hold {
            release: release_rx,
            entered: Arc::new(entered_tx),
        };
        self.state
            .lock()
            .await
            .holds
            .insert((op, table.to_string()), hold);
        Gate {
            release: release_tx,
            entered: entered_rx,
        }
    }

    /// Number of `op` calls made against `table` so far, failed ones included.
    pub async fn calls(&self, op: Op, table: &str) -> usize {
        let state = self.state.lock().await;
        state
            .calls
            .get(&(op, table.to_string()))
            .copied()
            .unwrap_or(0)
    }

    async fn enter(&self, op: Op, table: &str) -> Result<(), GatewayError> {
        let hold = {
            let mut state = self.state.lock().await;
            *state.calls.entry((op, table.to_string())).or_default() += 1;
            state.holds.get(&(op, table.to_string())).cloned()
        };
        if let Some(mut hold) = hold {
            hold.entered.send_modify(|count| *count += 1);
            let _ = hold.release.wait_for(|released| *released).await;
        }
        self.state.lock().await.check_failure(op, table)
    }

    fn publish(&self, events: Vec<(String, ChangeEvent)>) {
        for event in events {
            // no receivers is fine
            let _ = self.changes.send(event);
        }
    }

    fn lookup_user(state: &State, args: &Value) -> Value {
        let email = args
            .get("email_input")
            .and_then(Value::as_str)
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        state
            .accounts
            .get(&email)
            .map_or(Value::Null, |account| json!(account.user.id))
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, GatewayError> {
        self.enter(Op::Select, &query.table).await?;
        let state = self.state.lock().await;
        let rows = state.tables.get(&query.table).map(Vec::as_slice).unwrap_or(&[]);
        Ok(query.apply(rows))
    }

    async fn count(&self, query: &Query) -> Result<usize, GatewayError> {
        self.enter(Op::Count, &query.table).await?;
        let state = self.state.lock().await;
        let rows = state.tables.get(&query.table).map(Vec::as_slice).unwrap_or(&[]);
        Ok(rows.iter().filter(|row| query.matches(row)).count())
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>, GatewayError> {
        self.enter(Op::Insert, table).await?;
        let now = Utc::now();
        let mut prepared = Vec::with_capacity(rows.len());
        for row in rows {
            let Value::Object(mut obj) = row else {
                return Err(GatewayError::Rejected(
                    "insert expects JSON objects".to_string(),
                ));
            };
            apply_defaults(table, &mut obj, now);
            prepared.push(Value::Object(obj));
        }

        let mut state = self.state.lock().await;
        let existing = state.table(table);
        for (i, row) in prepared.iter().enumerate() {
            let earlier = &prepared[..i];
            if let Some(id) = row.get("id")
                && existing
                    .iter()
                    .chain(earlier)
                    .any(|other| other.get("id") == Some(id))
            {
                return Err(GatewayError::Rejected(format!(
                    "duplicate key value violates primary key of {table}"
                )));
            }
            if let Some(columns) = unique_key(table) {
                let key = key_of(row, columns);
                if existing
                    .iter()
                    .chain(earlier)
                    .any(|other| key_of(other, columns) == key)
                {
                    return Err(GatewayError::Rejected(format!(
                        "duplicate key value violates unique constraint on {table}"
                    )));
                }
            }
        }
        existing.extend(prepared.iter().cloned());
        drop(state);

        self.publish(
            prepared
                .iter()
                .map(|row| (table.to_string(), ChangeEvent::Insert(row.clone())))
                .collect(),
        );
        Ok(prepared)
    }

    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>, GatewayError> {
        self.enter(Op::Update, &query.table).await?;
        if !patch.is_object() {
            return Err(GatewayError::Rejected("patch must be a JSON object".to_string()));
        }
        let mut state = self.state.lock().await;
        let mut updated = Vec::new();
        let mut events = Vec::new();
        for row in state
            .table(&query.table)
            .iter_mut()
            .filter(|row| query.matches(row))
        {
            let old_record = row.clone();
            merge(row, &patch);
            updated.push(row.clone());
            events.push((
                query.table.clone(),
                ChangeEvent::Update {
                    record: row.clone(),
                    old_record,
                },
            ));
        }
        drop(state);
        self.publish(events);
        Ok(updated)
    }

    async fn update_many(&self, table: &str, patches: Vec<RowPatch>) -> Result<(), GatewayError> {
        self.enter(Op::Update, table).await?;
        let events = self.state.lock().await.apply_patches(table, &patches)?;
        self.publish(events);
        Ok(())
    }

    async fn delete(&self, query: &Query) -> Result<Vec<Value>, GatewayError> {
        self.enter(Op::Delete, &query.table).await?;
        let (removed, events) = self.state.lock().await.delete_cascading(query);
        self.publish(events);
        Ok(removed)
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value, GatewayError> {
        self.enter(Op::Rpc, function).await?;
        match function {
            "get_user_id_by_email" => {
                let state = self.state.lock().await;
                Ok(Self::lookup_user(&state, &args))
            }
            "batch_update" => {
                let table = args
                    .get("target_table")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let patches = args
                    .get("rows")
                    .and_then(Value::as_array)
                    .map(|rows| {
                        rows.iter()
                            .filter_map(|row| {
                                Some(RowPatch {
                                    id: id_of(row)?,
                                    patch: row.get("patch")?.clone(),
                                })
                            })
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                let events = self.state.lock().await.apply_patches(&table, &patches)?;
                self.publish(events);
                Ok(Value::Null)
            }
            other => Err(GatewayError::NotSupported(format!("rpc {other}"))),
        }
    }

    async fn subscribe(
        &self,
        table: &str,
        filter: Option<Filter>,
    ) -> Result<ChangeStream, GatewayError> {
        self.enter(Op::Subscribe, table).await?;
        let table = table.to_string();
        let stream = BroadcastStream::new(self.changes.subscribe()).filter_map(move |item| {
            let event = match item {
                Ok((source, event))
                    if source == table
                        && filter.as_ref().is_none_or(|f| f.matches(event.row())) =>
                {
                    Some(event)
                }
                Ok(_) => None,
                Err(err) => {
                    warn!(table = %table, error = %err, "memory change feed lagged");
                    None
                }
            };
            future::ready(event)
        });
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl AuthGateway for MemoryGateway {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<AuthUser, GatewayError> {
        let key = email.trim().to_ascii_lowercase();
        let mut state = self.state.lock().await;
        if state.accounts.contains_key(&key) {
            return Err(GatewayError::Rejected("User already registered".to_string()));
        }
        let user = AuthUser {
            id: Uuid::new_v4(),
            email: key.clone(),
        };
        let mut profile = Map::new();
        profile.insert("id".to_string(), json!(user.id));
        profile.insert("full_name".to_string(), json!(full_name));
        apply_defaults("profiles", &mut profile, Utc::now());
        state.table("profiles").push(Value::Object(profile));
        state.accounts.insert(
            key,
            Account {
                user: user.clone(),
                password: password.to_string(),
            },
        );
        state.current = Some(user.clone());
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, GatewayError> {
        let key = email.trim().to_ascii_lowercase();
        let mut state = self.state.lock().await;
        let user = state
            .accounts
            .get(&key)
            .filter(|account| account.password == password)
            .map(|account| account.user.clone())
            .ok_or_else(|| GatewayError::Rejected("Invalid login credentials".to_string()))?;
        state.current = Some(user.clone());
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        self.state.lock().await.current = None;
        Ok(())
    }

    async fn update_password(&self, password: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        let email = state
            .current
            .as_ref()
            .map(|user| user.email.clone())
            .ok_or(GatewayError::Unauthenticated)?;
        if let Some(account) = state.accounts.get_mut(&email) {
            account.password = password.to_string();
        }
        Ok(())
    }

    async fn current_user(&self) -> Option<AuthUser> {
        self.state.lock().await.current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn insert_applies_defaults_and_unique_keys() {
        let gw = MemoryGateway::new();
        let user = Uuid::new_v4();
        let rows = gw
            .insert("tasks", vec![json!({ "title": "a", "created_by": user })])
            .await
            .unwrap();
        assert_eq!(rows[0]["status"], "todo");
        assert_eq!(rows[0]["priority"], "medium");
        assert!(rows[0]["id"].is_string());

        let habit = Uuid::new_v4();
        let day = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let log = json!({ "habit_id": habit, "user_id": user, "logged_date": day });
        gw.insert("habit_logs", vec![log.clone()]).await.unwrap();
        let err = gw.insert("habit_logs", vec![log]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
        assert_eq!(gw.rows("habit_logs").await.len(), 1);
    }

    #[tokio::test]
    async fn delete_cascades_to_children() {
        let gw = MemoryGateway::new();
        let user = Uuid::new_v4();
        let parent = gw
            .seed("tasks", vec![json!({ "title": "p", "created_by": user })])
            .await;
        let parent_id = parent[0]["id"].clone();
        gw.seed(
            "tasks",
            vec![json!({ "title": "child", "created_by": user, "parent_id": parent_id })],
        )
        .await;
        gw.seed(
            "task_comments",
            vec![json!({ "task_id": parent_id, "user_id": user, "content": "hi" })],
        )
        .await;

        let removed = gw
            .delete(&Query::table("tasks").eq("id", &parent_id))
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert!(gw.rows("tasks").await.is_empty());
        assert!(gw.rows("task_comments").await.is_empty());
    }

    #[tokio::test]
    async fn update_many_is_all_or_nothing() {
        let gw = MemoryGateway::new();
        let user = Uuid::new_v4();
        let rows = gw
            .seed("tasks", vec![json!({ "title": "a", "created_by": user })])
            .await;
        let id = id_of(&rows[0]).unwrap();
        let err = gw
            .update_many(
                "tasks",
                vec![
                    RowPatch { id, patch: json!({ "sort_order": 5 }) },
                    RowPatch { id: Uuid::new_v4(), patch: json!({ "sort_order": 6 }) },
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
        assert_eq!(gw.rows("tasks").await[0]["sort_order"], 0);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let gw = MemoryGateway::new();
        gw.fail_once(Op::Select, "tasks").await;
        assert!(gw.select(&Query::table("tasks")).await.is_err());
        assert!(gw.select(&Query::table("tasks")).await.is_ok());
        assert_eq!(gw.calls(Op::Select, "tasks").await, 2);
    }

    #[tokio::test]
    async fn subscribers_only_see_matching_rows() {
        let gw = MemoryGateway::new();
        let me = Uuid::new_v4();
        let mut feed = gw
            .subscribe("notifications", Some(Filter::eq("user_id", me)))
            .await
            .unwrap();
        gw.insert(
            "notifications",
            vec![
                json!({ "user_id": Uuid::new_v4(), "type": "mention", "title": "other" }),
                json!({ "user_id": me, "type": "mention", "title": "mine" }),
            ],
        )
        .await
        .unwrap();
        let Some(ChangeEvent::Insert(row)) = feed.next().await else {
            panic!("expected insert");
        };
        assert_eq!(row["title"], "mine");
    }

    #[tokio::test]
    async fn held_calls_wait_for_release() {
        let gw = MemoryGateway::new();
        let mut gate = gw.hold(Op::Count, "tasks").await;
        let counter = gw.clone();
        let call = tokio::spawn(async move { counter.count(&Query::table("tasks")).await });
        gate.entered().await;
        assert!(!call.is_finished());
        gate.release();
        assert_eq!(call.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn lookup_by_email_rpc() {
        let gw = MemoryGateway::new();
        let user = gw.sign_up("Ana@Example.com", "password1", "Ana").await.unwrap();
        let found = gw
            .rpc("get_user_id_by_email", json!({ "email_input": "ana@example.com" }))
            .await
            .unwrap();
        assert_eq!(found, json!(user.id));
        let missing = gw
            .rpc("get_user_id_by_email", json!({ "email_input": "nobody@example.com" }))
            .await
            .unwrap();
        assert!(missing.is_null());
    }
}
