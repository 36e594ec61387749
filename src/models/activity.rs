use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only record of who did what to which task. Entries are never
/// updated or deleted by application logic; they outlive task deletion.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ActivityLogEntry {
    pub entry_id: String,
    pub user_id: String,
    pub workspace_id: String,
    pub task_id: String,
    pub action: String,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}
