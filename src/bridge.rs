//! Keeps the notification store live from the realtime change feed.

use futures::StreamExt;
use planpilot_schema::Notification;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PilotError;
use crate::gateway::{ChangeEvent, Filter, Gateway};
use crate::store::NotificationStore;

/// Running subscription; dropping it ends the subscription.
pub struct NotificationBridge {
    task: JoinHandle<()>,
}

impl NotificationBridge {
    /// Subscribes to the user's `notifications` rows and forwards every event into `store`.
    pub async fn start(
        gateway: Arc<dyn Gateway>,
        store: NotificationStore,
    ) -> Result<Self, PilotError> {
        let user_id = store.user_id();
        let mut changes = gateway
            .subscribe("notifications", Some(Filter::eq("user_id", user_id)))
            .await?;
        info!(%user_id, "notification bridge subscribed");

        let task = tokio::spawn(async move {
            while let Some(event) = changes.next().await {
                apply(&store, event);
            }
            debug!(%user_id, "notification feed ended");
        });
        Ok(Self { task })
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for NotificationBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn decode(row: Value) -> Option<Notification> {
    match serde_json::from_value(row) {
        Ok(notification) => Some(notification),
        Err(err) => {
            warn!(error = %err, "undecodable notification change");
            None
        }
    }
}

fn row_id(row: &Value) -> Option<Uuid> {
    row.get("id")
        .and_then(Value::as_str)
        .and_then(|id| Uuid::parse_str(id).ok())
}

/// Inserts and updates go through the store's single merge path.
fn apply(store: &NotificationStore, event: ChangeEvent) {
    match event {
        ChangeEvent::Insert(row) | ChangeEvent::Update { record: row, .. } => {
            if let Some(notification) = decode(row) {
                store.merge(notification);
            }
        }
        ChangeEvent::Delete(old) => {
            if let Some(id) = row_id(&old) {
                store.remove(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use planpilot_schema::{NewNotification, NotificationKind};
    use std::time::Duration;

    async fn settle<F: Fn() -> bool>(check: F) {
        for _ in 0..50 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn pushed_rows_are_merged_once() {
        let gw = MemoryGateway::new();
        let user = Uuid::new_v4();
        let store = NotificationStore::new(Arc::new(gw.clone()), user, 30);
        let bridge = NotificationBridge::start(Arc::new(gw.clone()), store.clone())
            .await
            .unwrap();

        // another client inserts a row for this user, plus one for someone else
        let other = NotificationStore::new(Arc::new(gw.clone()), Uuid::new_v4(), 30);
        let remote = NotificationStore::new(Arc::new(gw.clone()), user, 30);
        remote
            .add(vec![NewNotification::new(user, NotificationKind::TaskAssigned, "Assigned")])
            .await
            .unwrap();
        other
            .add(vec![NewNotification::new(other.user_id(), NotificationKind::Mention, "x")])
            .await
            .unwrap();

        settle(|| store.notifications().len() == 1).await;
        store.fetch().await.unwrap();
        assert_eq!(store.notifications().len(), 1);
        assert_eq!(store.unread_count(), 1);

        remote.clear_all().await.unwrap();
        settle(|| store.notifications().is_empty()).await;

        assert!(bridge.is_running());
        bridge.stop();
    }
}
