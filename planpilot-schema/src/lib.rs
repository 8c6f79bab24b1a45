//! Row and wire types shared by the PlanPilot sync layer and its HTTP service.
//!
//! Row types mirror the hosted tables one-to-one. Fields that only exist as
//! client-side projections (joined tags, comment authors) are never serialized
//! back to the gateway.

pub mod chat;
pub mod habit;
pub mod notification;
pub mod task;
pub mod workspace;

pub use chat::{
    AssistantRequest, AssistantResponse, ChatCompletionRequest, ChatCompletionResponse,
    ChatMessage, ContentBlock, Role,
};
pub use habit::{Habit, HabitLog, NewHabit};
pub use notification::{NewNotification, Notification, NotificationKind};
pub use task::{NewTask, Priority, Tag, Task, TaskComment, TaskPatch, TaskStatus, TaskTag};
pub use workspace::{MemberRole, Profile, ProfilePatch, Workspace, WorkspaceMember, WorkspacePatch};
