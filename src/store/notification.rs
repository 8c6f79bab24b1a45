use planpilot_schema::{NewNotification, Notification};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Snapshot, StoreCell};
use crate::error::PilotError;
use crate::gateway::{self, Gateway, Query};

/// Newest notifications of one user, `created_at` descending.
///
/// Rows arrive three ways: fetches, local inserts and the realtime feed. All of
/// them go through [`NotificationStore::merge`], so each id is cached once.
#[derive(Clone)]
pub struct NotificationStore {
    gateway: Arc<dyn Gateway>,
    user_id: Uuid,
    page_size: usize,
    cell: StoreCell<Notification>,
}

impl NotificationStore {
    pub fn new(gateway: Arc<dyn Gateway>, user_id: Uuid, page_size: usize) -> Self {
        Self {
            gateway,
            user_id,
            page_size: page_size.max(1),
            cell: StoreCell::new(),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.cell.items()
    }

    pub fn snapshot(&self) -> Snapshot<Notification> {
        self.cell.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot<Notification>> {
        self.cell.subscribe()
    }

    pub fn unread_count(&self) -> usize {
        self.cell
            .snapshot()
            .items
            .iter()
            .filter(|n| !n.is_read)
            .count()
    }

    pub async fn fetch(&self) -> Result<(), PilotError> {
        self.cell.set_loading();
        let query = Query::table("notifications")
            .eq("user_id", self.user_id)
            .order_by("created_at", false)
            .limit(self.page_size);
        match gateway::fetch::<Notification>(self.gateway.as_ref(), &query).await {
            Ok(rows) => {
                debug!(user_id = %self.user_id, count = rows.len(), "notifications fetched");
                self.cell.finish_load(Ok(rows));
                Ok(())
            }
            Err(err) => {
                let err = PilotError::from(err);
                warn!(user_id = %self.user_id, error = %err, "notification fetch failed");
                self.cell.finish_load(Err(&err));
                Err(err)
            }
        }
    }

    /// Inserts the rows remotely and merges what the server stored.
    pub async fn add(&self, rows: Vec<NewNotification>) -> Result<Vec<Notification>, PilotError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let payload = rows
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        let result = self.gateway.insert("notifications", payload).await;
        let stored = self.cell.settle("add notifications", None, result)?;
        let stored: Vec<Notification> = gateway::decode_rows(stored)?;
        for notification in &stored {
            self.merge(notification.clone());
        }
        Ok(stored)
    }

    /// Caches `notification` once by id, keeping newest-first order and the page size.
    pub fn merge(&self, notification: Notification) {
        if notification.user_id != self.user_id {
            return;
        }
        let page_size = self.page_size;
        self.cell.modify(|snap| {
            snap.items.retain(|cached| cached.id != notification.id);
            let index = snap
                .items
                .iter()
                .position(|cached| cached.created_at < notification.created_at)
                .unwrap_or(snap.items.len());
            snap.items.insert(index, notification);
            snap.items.truncate(page_size);
        });
    }

    /// Drops a notification from the cache without touching the remote row.
    pub fn remove(&self, id: Uuid) {
        self.cell.remove(id);
    }

    pub async fn mark_read(&self, id: Uuid) -> Result<(), PilotError> {
        let undo = self.cell.update_with(id, |n| n.is_read = true);
        let result = self
            .gateway
            .update(
                &Query::table("notifications").eq("id", id),
                json!({ "is_read": true }),
            )
            .await;
        self.cell.settle("mark notification read", undo, result)?;
        Ok(())
    }

    pub async fn mark_all_read(&self) -> Result<(), PilotError> {
        let before = self.cell.items();
        let after: Vec<Notification> = before
            .iter()
            .cloned()
            .map(|mut n| {
                n.is_read = true;
                n
            })
            .collect();
        let undo = self.cell.replace_all(after);
        let result = self
            .gateway
            .update(
                &Query::table("notifications")
                    .eq("user_id", self.user_id)
                    .eq("is_read", false),
                json!({ "is_read": true }),
            )
            .await;
        self.cell.settle("mark all notifications read", Some(undo), result)?;
        Ok(())
    }

    /// Deletes every notification of the user.
    pub async fn clear_all(&self) -> Result<(), PilotError> {
        let undo = self.cell.replace_all(Vec::new());
        let result = self
            .gateway
            .delete(&Query::table("notifications").eq("user_id", self.user_id))
            .await;
        self.cell.settle("clear notifications", Some(undo), result)?;
        Ok(())
    }

    pub fn clear(&self) {
        self.cell.clear();
    }
}
