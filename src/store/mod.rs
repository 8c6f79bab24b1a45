//! Entity stores. Each store mirrors one remote collection for the signed-in user.
//!
//! Every write follows the same shape: capture an `Undo`, apply the change to the
//! local snapshot, issue the remote call, then reconcile on success or revert the
//! undo on failure.

mod auth;
pub mod board;
mod detail;
mod habit;
mod notification;
mod tag;
mod task;
mod workspace;

pub use auth::{AuthState, AuthStore, SignUp};
pub use detail::TaskDetail;
pub use habit::{HABIT_COLORS, HABIT_ICONS, HabitStats, HabitStore, TrackedHabit};
pub use notification::NotificationStore;
pub use tag::{TAG_PALETTE, TagStore};
pub use task::TaskStore;
pub use workspace::{WorkspaceStore, select_active};

use planpilot_schema::{Notification, Tag, Task, Workspace, WorkspaceMember};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

use crate::error::{GatewayError, PilotError};

/// Rows a store can address by id.
pub trait Keyed {
    fn key(&self) -> Uuid;
}

impl Keyed for Task {
    fn key(&self) -> Uuid {
        self.id
    }
}

impl Keyed for Workspace {
    fn key(&self) -> Uuid {
        self.id
    }
}

impl Keyed for WorkspaceMember {
    fn key(&self) -> Uuid {
        self.id.unwrap_or(self.user_id)
    }
}

impl Keyed for Notification {
    fn key(&self) -> Uuid {
        self.id
    }
}

impl Keyed for Tag {
    fn key(&self) -> Uuid {
        self.id
    }
}

/// What presentation code renders: the cached rows plus request state.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub items: Vec<T>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: false,
            error: None,
        }
    }
}

/// Inverse of one optimistic local write.
#[derive(Debug, Clone)]
pub enum Undo<T> {
    /// Put this pre-write copy back in place of the row with the same id.
    Replace(T),
    /// Re-insert a removed row at its old position.
    Reinsert { index: usize, item: T },
    /// Drop an optimistically inserted row.
    Remove(Uuid),
    /// Restore the whole list (reorders).
    Restore(Vec<T>),
}

/// Observable cache cell backing a store.
#[derive(Debug)]
pub struct StoreCell<T> {
    tx: Arc<watch::Sender<Snapshot<T>>>,
}

impl<T> Clone for StoreCell<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Clone + Keyed> Default for StoreCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Keyed> StoreCell<T> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Snapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        self.tx.borrow().clone()
    }

    pub fn items(&self) -> Vec<T> {
        self.tx.borrow().items.clone()
    }

    pub fn get(&self, id: Uuid) -> Option<T> {
        self.tx.borrow().items.iter().find(|item| item.key() == id).cloned()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.tx.borrow().items.iter().any(|item| item.key() == id)
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot<T>> {
        self.tx.subscribe()
    }

    pub fn modify(&self, f: impl FnOnce(&mut Snapshot<T>)) {
        self.tx.send_modify(f);
    }

    pub fn set_loading(&self) {
        self.modify(|snap| {
            snap.loading = true;
            snap.error = None;
        });
    }

    /// Settles a fetch: new rows on success, untouched rows plus an error otherwise.
    pub fn finish_load(&self, result: Result<Vec<T>, &PilotError>) {
        self.modify(|snap| {
            snap.loading = false;
            match result {
                Ok(items) => {
                    snap.items = items;
                    snap.error = None;
                }
                Err(err) => snap.error = Some(err.user_message()),
            }
        });
    }

    pub fn set_error(&self, err: &PilotError) {
        self.modify(|snap| snap.error = Some(err.user_message()));
    }

    pub fn clear(&self) {
        self.modify(|snap| *snap = Snapshot::default());
    }

    /// Applies `f` to the row with `id`; `None` when it is not cached.
    pub fn update_with(&self, id: Uuid, f: impl FnOnce(&mut T)) -> Option<Undo<T>> {
        let mut undo = None;
        self.modify(|snap| {
            if let Some(item) = snap.items.iter_mut().find(|item| item.key() == id) {
                undo = Some(Undo::Replace(item.clone()));
                f(item);
            }
        });
        undo
    }

    /// Replaces the cached row with the same id, or appends it.
    pub fn upsert(&self, item: T) {
        self.modify(|snap| {
            match snap.items.iter_mut().find(|cached| cached.key() == item.key()) {
                Some(cached) => *cached = item,
                None => snap.items.push(item),
            }
        });
    }

    pub fn insert_at(&self, index: usize, item: T) -> Undo<T> {
        let id = item.key();
        self.modify(|snap| {
            let index = index.min(snap.items.len());
            snap.items.insert(index, item);
        });
        Undo::Remove(id)
    }

    pub fn remove(&self, id: Uuid) -> Option<Undo<T>> {
        let mut undo = None;
        self.modify(|snap| {
            if let Some(index) = snap.items.iter().position(|item| item.key() == id) {
                let item = snap.items.remove(index);
                undo = Some(Undo::Reinsert { index, item });
            }
        });
        undo
    }

    /// Replaces the whole list, returning the previous one as undo.
    pub fn replace_all(&self, items: Vec<T>) -> Undo<T> {
        let mut previous = Vec::new();
        self.modify(|snap| previous = std::mem::replace(&mut snap.items, items));
        Undo::Restore(previous)
    }

    pub fn revert(&self, undo: Undo<T>) {
        self.modify(|snap| match undo {
            Undo::Replace(item) => {
                if let Some(cached) = snap.items.iter_mut().find(|c| c.key() == item.key()) {
                    *cached = item;
                }
            }
            Undo::Reinsert { index, item } => {
                if !snap.items.iter().any(|c| c.key() == item.key()) {
                    let index = index.min(snap.items.len());
                    snap.items.insert(index, item);
                }
            }
            Undo::Remove(id) => snap.items.retain(|c| c.key() != id),
            Undo::Restore(items) => snap.items = items,
        });
    }

    /// Resolves an optimistic write: keeps the local change when `result` is ok,
    /// otherwise reverts it and records the error.
    pub fn settle<R>(
        &self,
        action: &'static str,
        undo: Option<Undo<T>>,
        result: Result<R, GatewayError>,
    ) -> Result<R, PilotError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(action, error = %err, "remote write failed, reverting");
                if let Some(undo) = undo {
                    self.revert(undo);
                }
                let err = PilotError::from(err);
                self.set_error(&err);
                Err(err)
            }
        }
    }
}
