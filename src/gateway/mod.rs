//! Remote data gateway: the query-builder contract the stores are written against,
//! a PostgREST/GoTrue client for the hosted backend and an in-process double.

mod memory;
mod query;
mod realtime;
mod rest;

pub use memory::{Gate, MemoryGateway, Op};
pub use query::{Filter, Order, Query};
pub use rest::RestGateway;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::pin::Pin;
use uuid::Uuid;

use crate::error::GatewayError;

/// Server-pushed row change for a subscribed table.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert(Value),
    Update { record: Value, old_record: Value },
    Delete(Value),
}

impl ChangeEvent {
    /// Decodes the feed's `{"type":"INSERT"|"UPDATE"|"DELETE","record":..,"old_record":..}`.
    pub fn from_wire(value: Value) -> Result<Self, GatewayError> {
        let mut value = value;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_ascii_uppercase)
            .unwrap_or_default();
        let record = value.get_mut("record").map(Value::take).unwrap_or_default();
        let old_record = value
            .get_mut("old_record")
            .map(Value::take)
            .unwrap_or_default();
        match kind.as_str() {
            "INSERT" => Ok(ChangeEvent::Insert(record)),
            "UPDATE" => Ok(ChangeEvent::Update { record, old_record }),
            "DELETE" => Ok(ChangeEvent::Delete(old_record)),
            other => Err(GatewayError::Rejected(format!(
                "unknown change event type: {other:?}"
            ))),
        }
    }

    /// The row a subscription filter is evaluated against.
    pub fn row(&self) -> &Value {
        match self {
            ChangeEvent::Insert(record) | ChangeEvent::Update { record, .. } => record,
            ChangeEvent::Delete(old_record) => old_record,
        }
    }
}

pub type ChangeStream = Pin<Box<dyn Stream<Item = ChangeEvent> + Send>>;

/// One row of an atomic `update_many` batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowPatch {
    pub id: Uuid,
    pub patch: Value,
}

/// Query-builder access to the hosted relational store.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, GatewayError>;

    async fn count(&self, query: &Query) -> Result<usize, GatewayError>;

    /// Inserts every row or none; returns the stored rows with server defaults.
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>, GatewayError>;

    /// Merges `patch` into every row the query matches; returns the updated rows.
    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>, GatewayError>;

    /// Applies per-row patches keyed by `id` as a single all-or-nothing batch.
    async fn update_many(&self, table: &str, patches: Vec<RowPatch>) -> Result<(), GatewayError>;

    /// Deletes every row the query matches; returns the deleted rows.
    async fn delete(&self, query: &Query) -> Result<Vec<Value>, GatewayError>;

    async fn rpc(&self, function: &str, args: Value) -> Result<Value, GatewayError>;

    /// Change feed for `table`, narrowed by `filter` when given.
    async fn subscribe(
        &self,
        table: &str,
        filter: Option<Filter>,
    ) -> Result<ChangeStream, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

/// Password authentication against the hosted auth service.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<AuthUser, GatewayError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, GatewayError>;

    async fn sign_out(&self) -> Result<(), GatewayError>;

    async fn update_password(&self, password: &str) -> Result<(), GatewayError>;

    async fn current_user(&self) -> Option<AuthUser>;
}

/// Typed `select`.
pub async fn fetch<T: DeserializeOwned>(
    gateway: &dyn Gateway,
    query: &Query,
) -> Result<Vec<T>, GatewayError> {
    let rows = gateway.select(query).await?;
    decode_rows(rows)
}

/// Typed single-row insert.
pub async fn insert_one<T: Serialize + ?Sized, R: DeserializeOwned>(
    gateway: &dyn Gateway,
    table: &str,
    row: &T,
) -> Result<R, GatewayError> {
    let row = serde_json::to_value(row)?;
    let stored = gateway.insert(table, vec![row]).await?;
    let first = stored
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::Rejected(format!("insert into {table} returned no row")))?;
    Ok(serde_json::from_value(first)?)
}

pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, GatewayError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<_, _>>()
        .map_err(GatewayError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_wire_events() {
        let insert = ChangeEvent::from_wire(json!({
            "type": "INSERT",
            "record": { "id": 1 },
        }))
        .unwrap();
        assert_eq!(insert, ChangeEvent::Insert(json!({ "id": 1 })));

        let delete = ChangeEvent::from_wire(json!({
            "type": "delete",
            "old_record": { "id": 2 },
        }))
        .unwrap();
        assert_eq!(delete.row(), &json!({ "id": 2 }));

        assert!(ChangeEvent::from_wire(json!({ "type": "TRUNCATE" })).is_err());
    }
}
