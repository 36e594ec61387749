use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Assignment,
    Mention,
    Update,
    Completion,
}

/// Created only as a side effect of the mutation pipeline (one per assignee
/// at task creation), never directly by a client.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Notification {
    pub notification_id: String,
    pub user_id: String,
    pub workspace_id: String,
    pub task_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
