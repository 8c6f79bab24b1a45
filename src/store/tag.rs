use planpilot_schema::Tag;
use rand::seq::IndexedRandom;
use std::sync::Arc;
use uuid::Uuid;

use super::{Snapshot, StoreCell};
use crate::error::PilotError;
use crate::gateway::{self, Gateway, Query};

/// Colors a new tag is drawn from.
pub const TAG_PALETTE: [&str; 6] = [
    "#6366f1", "#0ea5e9", "#10b981", "#f59e0b", "#ef4444", "#ec4899",
];

/// Tags of one workspace.
#[derive(Clone)]
pub struct TagStore {
    gateway: Arc<dyn Gateway>,
    user_id: Uuid,
    workspace_id: Uuid,
    cell: StoreCell<Tag>,
}

impl TagStore {
    pub fn new(gateway: Arc<dyn Gateway>, user_id: Uuid, workspace_id: Uuid) -> Self {
        Self {
            gateway,
            user_id,
            workspace_id,
            cell: StoreCell::new(),
        }
    }

    pub fn tags(&self) -> Vec<Tag> {
        self.cell.items()
    }

    pub fn snapshot(&self) -> Snapshot<Tag> {
        self.cell.snapshot()
    }

    pub async fn fetch_all(&self) -> Result<(), PilotError> {
        self.cell.set_loading();
        let query = Query::table("tags").eq("workspace_id", self.workspace_id);
        let result = gateway::fetch::<Tag>(self.gateway.as_ref(), &query)
            .await
            .map_err(PilotError::from);
        match result {
            Ok(tags) => {
                self.cell.finish_load(Ok(tags));
                Ok(())
            }
            Err(err) => {
                self.cell.finish_load(Err(&err));
                Err(err)
            }
        }
    }

    /// Creates a tag with a random palette color.
    pub async fn create(&self, name: &str) -> Result<Tag, PilotError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PilotError::validation("Tag name is required"));
        }
        let color = TAG_PALETTE
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(TAG_PALETTE[0]);
        let tag = Tag {
            id: Uuid::new_v4(),
            name: name.to_string(),
            color: color.to_string(),
            workspace_id: Some(self.workspace_id),
            created_by: Some(self.user_id),
        };
        let undo = self.cell.insert_at(usize::MAX, tag.clone());
        let row = serde_json::to_value(&tag)?;
        let result = self.gateway.insert("tags", vec![row]).await;
        self.cell.settle("create tag", Some(undo), result)?;
        Ok(tag)
    }
}
