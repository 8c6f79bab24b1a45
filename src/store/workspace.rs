use planpilot_schema::{MemberRole, Profile, Workspace, WorkspaceMember, WorkspacePatch};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Snapshot, StoreCell};
use crate::error::PilotError;
use crate::gateway::{self, Gateway, Query};

const PERSONAL_NAME: &str = "Personal";
const PERSONAL_ICON: &str = "🏠";

/// Workspaces the user owns or belongs to, the active one and its members.
#[derive(Clone)]
pub struct WorkspaceStore {
    gateway: Arc<dyn Gateway>,
    user_id: Uuid,
    cell: StoreCell<Workspace>,
    members: StoreCell<WorkspaceMember>,
    active: Arc<watch::Sender<Option<Uuid>>>,
}

/// Picks the saved preference if still visible, else the personal workspace, else the first.
pub fn select_active(workspaces: &[Workspace], preferred: Option<Uuid>) -> Option<Uuid> {
    preferred
        .and_then(|id| workspaces.iter().find(|w| w.id == id))
        .or_else(|| workspaces.iter().find(|w| w.is_personal))
        .or_else(|| workspaces.first())
        .map(|w| w.id)
}

impl WorkspaceStore {
    pub fn new(gateway: Arc<dyn Gateway>, user_id: Uuid) -> Self {
        let (active, _) = watch::channel(None);
        Self {
            gateway,
            user_id,
            cell: StoreCell::new(),
            members: StoreCell::new(),
            active: Arc::new(active),
        }
    }

    pub fn workspaces(&self) -> Vec<Workspace> {
        self.cell.items()
    }

    pub fn snapshot(&self) -> Snapshot<Workspace> {
        self.cell.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot<Workspace>> {
        self.cell.subscribe()
    }

    pub fn members(&self) -> Vec<WorkspaceMember> {
        self.members.items()
    }

    pub fn active_id(&self) -> Option<Uuid> {
        *self.active.borrow()
    }

    pub fn active(&self) -> Option<Workspace> {
        self.active_id().and_then(|id| self.cell.get(id))
    }

    pub fn watch_active(&self) -> watch::Receiver<Option<Uuid>> {
        self.active.subscribe()
    }

    /// Switches the active workspace; unknown ids are ignored.
    pub fn set_active(&self, id: Uuid) -> bool {
        if !self.cell.contains(id) {
            return false;
        }
        self.active.send_replace(Some(id));
        true
    }

    /// Loads owned and member workspaces, then re-selects the active one.
    pub async fn fetch_all(&self, preferred: Option<Uuid>) -> Result<(), PilotError> {
        self.cell.set_loading();
        match self.load().await {
            Ok(workspaces) => {
                let preferred = preferred.or_else(|| self.active_id());
                let active = select_active(&workspaces, preferred);
                debug!(user_id = %self.user_id, count = workspaces.len(), "workspaces fetched");
                self.cell.finish_load(Ok(workspaces));
                self.active.send_replace(active);
                Ok(())
            }
            Err(err) => {
                warn!(user_id = %self.user_id, error = %err, "workspace fetch failed");
                self.cell.finish_load(Err(&err));
                Err(err)
            }
        }
    }

    async fn load(&self) -> Result<Vec<Workspace>, PilotError> {
        let gw = self.gateway.as_ref();
        let mut all: Vec<Workspace> = gateway::fetch(
            gw,
            &Query::table("workspaces")
                .eq("owner_id", self.user_id)
                .order_by("created_at", true),
        )
        .await?;

        let memberships: Vec<WorkspaceMember> = gateway::fetch(
            gw,
            &Query::table("workspace_members").eq("user_id", self.user_id),
        )
        .await?;
        let owned: HashSet<Uuid> = all.iter().map(|w| w.id).collect();
        let joined: Vec<Uuid> = memberships
            .iter()
            .map(|m| m.workspace_id)
            .filter(|id| !owned.contains(id))
            .collect();
        if !joined.is_empty() {
            let shared: Vec<Workspace> = gateway::fetch(
                gw,
                &Query::table("workspaces")
                    .in_list("id", joined)
                    .order_by("created_at", true),
            )
            .await?;
            all.extend(shared);
        }
        Ok(all)
    }

    /// Returns the user's personal workspace, creating it with an owner membership on first use.
    pub async fn ensure_personal(&self) -> Result<Workspace, PilotError> {
        let existing: Vec<Workspace> = gateway::fetch(
            self.gateway.as_ref(),
            &Query::table("workspaces")
                .eq("owner_id", self.user_id)
                .eq("is_personal", true)
                .limit(1),
        )
        .await?;
        if let Some(personal) = existing.into_iter().next() {
            self.cell.upsert(personal.clone());
            return Ok(personal);
        }

        info!(user_id = %self.user_id, "creating personal workspace");
        let personal = self
            .insert_workspace(PERSONAL_NAME, Some(PERSONAL_ICON), None, true)
            .await?;
        if self.active_id().is_none() {
            self.active.send_replace(Some(personal.id));
        }
        Ok(personal)
    }

    pub async fn create(
        &self,
        name: &str,
        icon: Option<&str>,
        color: Option<&str>,
    ) -> Result<Workspace, PilotError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PilotError::validation("Workspace name is required"));
        }
        self.insert_workspace(name, icon, color, false).await
    }

    async fn insert_workspace(
        &self,
        name: &str,
        icon: Option<&str>,
        color: Option<&str>,
        is_personal: bool,
    ) -> Result<Workspace, PilotError> {
        let id = Uuid::new_v4();
        let row = json!({
            "id": id,
            "name": name,
            "icon": icon,
            "color": color,
            "owner_id": self.user_id,
            "is_personal": is_personal,
        });
        let result = self.gateway.insert("workspaces", vec![row]).await;
        let stored = self.cell.settle("create workspace", None, result)?;
        let workspace = gateway::decode_rows::<Workspace>(stored)?
            .into_iter()
            .next()
            .ok_or_else(|| PilotError::not_found("workspace", id))?;
        self.cell.upsert(workspace.clone());

        let owner = WorkspaceMember {
            id: None,
            workspace_id: workspace.id,
            user_id: self.user_id,
            role: MemberRole::Owner,
            profile: None,
        };
        let membership = serde_json::to_value(&owner)?;
        if let Err(err) = self.gateway.insert("workspace_members", vec![membership]).await {
            warn!(workspace_id = %workspace.id, error = %err, "owner membership insert failed");
        }
        Ok(workspace)
    }

    pub async fn update(&self, id: Uuid, patch: WorkspacePatch) -> Result<(), PilotError> {
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(PilotError::validation("Workspace name is required"));
        }
        let undo = self.cell.update_with(id, |w| patch.apply(w));
        let body = serde_json::to_value(&patch)?;
        let result = self
            .gateway
            .update(&Query::table("workspaces").eq("id", id), body)
            .await;
        let stored = self.cell.settle("update workspace", undo, result)?;
        if let Some(workspace) = gateway::decode_rows::<Workspace>(stored)?.into_iter().next() {
            self.cell.upsert(workspace);
        }
        Ok(())
    }

    /// Deletes a workspace; the active selection moves to another one when needed.
    pub async fn delete(&self, id: Uuid) -> Result<(), PilotError> {
        let was_active = self.active_id() == Some(id);
        let undo = self.cell.remove(id);
        if was_active {
            self.active.send_replace(select_active(&self.cell.items(), None));
        }
        let result = self
            .gateway
            .delete(&Query::table("workspaces").eq("id", id))
            .await;
        if let Err(err) = self.cell.settle("delete workspace", undo, result) {
            if was_active {
                self.active.send_replace(Some(id));
            }
            return Err(err);
        }
        Ok(())
    }

    /// Members of `workspace_id` with their profiles joined in.
    pub async fn fetch_members(&self, workspace_id: Uuid) -> Result<Vec<WorkspaceMember>, PilotError> {
        self.members.set_loading();
        match self.load_members(workspace_id).await {
            Ok(members) => {
                self.members.finish_load(Ok(members.clone()));
                Ok(members)
            }
            Err(err) => {
                warn!(%workspace_id, error = %err, "member fetch failed");
                self.members.finish_load(Err(&err));
                Err(err)
            }
        }
    }

    async fn load_members(&self, workspace_id: Uuid) -> Result<Vec<WorkspaceMember>, PilotError> {
        let gw = self.gateway.as_ref();
        let mut members: Vec<WorkspaceMember> = gateway::fetch(
            gw,
            &Query::table("workspace_members").eq("workspace_id", workspace_id),
        )
        .await?;
        if members.is_empty() {
            return Ok(members);
        }
        let profiles: Vec<Profile> = gateway::fetch(
            gw,
            &Query::table("profiles").in_list("id", members.iter().map(|m| m.user_id)),
        )
        .await?;
        let mut by_id: HashMap<Uuid, Profile> = profiles.into_iter().map(|p| (p.id, p)).collect();
        for member in &mut members {
            member.profile = by_id.remove(&member.user_id);
        }
        Ok(members)
    }

    /// Adds the account registered under `email` to the workspace.
    pub async fn invite(
        &self,
        workspace_id: Uuid,
        email: &str,
        role: MemberRole,
    ) -> Result<(), PilotError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(PilotError::validation("Email is required"));
        }
        let found = self
            .gateway
            .rpc("get_user_id_by_email", json!({ "email_input": email }))
            .await?;
        let user_id = match found {
            Value::Null => None,
            value => serde_json::from_value::<Option<Uuid>>(value)?,
        }
        .ok_or_else(|| {
            PilotError::validation("No user found with that email. They must sign up first.")
        })?;

        let existing = self
            .gateway
            .count(
                &Query::table("workspace_members")
                    .eq("workspace_id", workspace_id)
                    .eq("user_id", user_id),
            )
            .await?;
        if existing > 0 {
            return Err(PilotError::validation(
                "This user is already a member of this workspace.",
            ));
        }

        let member = WorkspaceMember {
            id: None,
            workspace_id,
            user_id,
            role,
            profile: None,
        };
        self.gateway
            .insert("workspace_members", vec![serde_json::to_value(&member)?])
            .await?;
        info!(%workspace_id, %user_id, role = role.as_str(), "member invited");
        self.fetch_members(workspace_id).await?;
        Ok(())
    }

    pub async fn change_role(
        &self,
        workspace_id: Uuid,
        member_id: Uuid,
        role: MemberRole,
    ) -> Result<(), PilotError> {
        let undo = self.members.update_with(member_id, |m| m.role = role);
        let result = self
            .gateway
            .update(
                &Query::table("workspace_members").eq("id", member_id),
                json!({ "role": role }),
            )
            .await;
        self.members.settle("change member role", undo, result)?;
        self.fetch_members(workspace_id).await?;
        Ok(())
    }

    pub async fn remove_member(&self, workspace_id: Uuid, member_id: Uuid) -> Result<(), PilotError> {
        let undo = self.members.remove(member_id);
        let result = self
            .gateway
            .delete(&Query::table("workspace_members").eq("id", member_id))
            .await;
        self.members.settle("remove member", undo, result)?;
        self.fetch_members(workspace_id).await?;
        Ok(())
    }

    pub fn clear(&self) {
        self.cell.clear();
        self.members.clear();
        self.active.send_replace(None);
    }
}
