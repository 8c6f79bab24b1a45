use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row of `workspaces`. Each user is expected to own exactly one personal
/// workspace, created lazily on first use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    pub owner_id: Uuid,
    #[serde(default)]
    pub is_personal: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspacePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl WorkspacePatch {
    pub fn apply(&self, workspace: &mut Workspace) {
        if let Some(name) = &self.name {
            workspace.name.clone_from(name);
        }
        if let Some(icon) = &self.icon {
            workspace.icon = Some(icon.clone());
        }
        if let Some(color) = &self.color {
            workspace.color = Some(color.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Admin,
    #[default]
    Member,
    Viewer,
}

impl MemberRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberRole::Owner => "owner",
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
            MemberRole::Viewer => "viewer",
        }
    }
}

/// One row of `workspace_members`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMember {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub role: MemberRole,

    /// Joined from `profiles`; read-only projection.
    #[serde(default, skip_serializing)]
    pub profile: Option<Profile>,
}

/// One row of `profiles`, keyed by the auth user id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub accent_color: Option<String>,
}

impl Profile {
    /// Name shown next to comments and member lists.
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
    pub full_name: String,
    pub username: Option<String>,
    pub accent_color: String,
}

impl ProfilePatch {
    pub fn apply(&self, profile: &mut Profile) {
        profile.full_name = Some(self.full_name.clone());
        profile.username.clone_from(&self.username);
        profile.accent_color = Some(self.accent_color.clone());
    }
}
