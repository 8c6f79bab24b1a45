//! Per-user state container: built on sign-in, torn down on sign-out.

use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::bridge::NotificationBridge;
use crate::config::Config;
use crate::error::PilotError;
use crate::gateway::{AuthUser, Gateway};
use crate::reminders::{ReminderEvaluator, ReminderHandle};
use crate::store::{HabitStore, NotificationStore, TagStore, TaskStore, WorkspaceStore};

pub struct Session {
    user: AuthUser,
    gateway: Arc<dyn Gateway>,
    pub tasks: TaskStore,
    pub habits: HabitStore,
    pub workspaces: WorkspaceStore,
    pub notifications: NotificationStore,
    bridge: Option<NotificationBridge>,
    reminders: Option<ReminderHandle>,
}

impl Session {
    /// Builds every store for `user`, loads them, and starts the realtime bridge
    /// and the reminder actor.
    ///
    /// Load failures stay visible in the affected store's snapshot; only a
    /// failure to start the reminder actor is returned.
    pub async fn start(
        gateway: Arc<dyn Gateway>,
        user: AuthUser,
        config: &Config,
    ) -> Result<Self, PilotError> {
        let user_id = user.id;
        let tasks = TaskStore::new(Arc::clone(&gateway), user_id);
        let habits = HabitStore::new(Arc::clone(&gateway), user_id, config.habits.clone());
        let workspaces = WorkspaceStore::new(Arc::clone(&gateway), user_id);
        let notifications = NotificationStore::new(
            Arc::clone(&gateway),
            user_id,
            config.notifications.page_size,
        );

        if let Err(err) = workspaces.ensure_personal().await {
            warn!(%user_id, error = %err, "personal workspace unavailable");
        }
        let today = Local::now().date_naive();
        let (w, t, h, n) = tokio::join!(
            workspaces.fetch_all(None),
            tasks.fetch_all(),
            habits.fetch_all(today),
            notifications.fetch(),
        );
        for (store, result) in [("workspaces", w), ("tasks", t), ("habits", h), ("notifications", n)] {
            if let Err(err) = result {
                warn!(%user_id, store, error = %err, "initial load failed");
            }
        }

        let bridge = match NotificationBridge::start(Arc::clone(&gateway), notifications.clone()).await
        {
            Ok(bridge) => Some(bridge),
            Err(err) => {
                warn!(%user_id, error = %err, "realtime notifications unavailable");
                None
            }
        };

        let evaluator = ReminderEvaluator::new(
            Arc::clone(&gateway),
            notifications.clone(),
            &config.reminders,
            &config.habits,
        );
        let interval = config.reminders.interval_secs.map(Duration::from_secs);
        let reminders = ReminderHandle::spawn(evaluator, interval).await?;

        info!(%user_id, "session started");
        Ok(Self {
            user,
            gateway,
            tasks,
            habits,
            workspaces,
            notifications,
            bridge,
            reminders: Some(reminders),
        })
    }

    pub fn user(&self) -> &AuthUser {
        &self.user
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    pub fn realtime_connected(&self) -> bool {
        self.bridge.as_ref().is_some_and(NotificationBridge::is_running)
    }

    pub fn reminders(&self) -> Option<&ReminderHandle> {
        self.reminders.as_ref()
    }

    /// Tag store for the active workspace.
    pub fn tags(&self) -> Option<TagStore> {
        self.workspaces
            .active_id()
            .map(|workspace_id| TagStore::new(Arc::clone(&self.gateway), self.user.id, workspace_id))
    }

    /// Stops background work and empties every cache.
    pub fn end(mut self) {
        if let Some(reminders) = self.reminders.take() {
            reminders.stop();
        }
        if let Some(bridge) = self.bridge.take() {
            bridge.stop();
        }
        self.tasks.clear();
        self.habits.clear();
        self.workspaces.clear();
        self.notifications.clear();
        info!(user_id = %self.user.id, "session ended");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(reminders) = self.reminders.take() {
            reminders.stop();
        }
    }
}
