use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::workspace::Role;

/// Denormalized copy of a workspace membership, kept on the user document
/// for fast "my workspaces" listing. The authoritative list lives on the
/// workspace itself.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserWorkspace {
    pub workspace_id: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub workspaces: Vec<UserWorkspace>,
    pub created_at: DateTime<Utc>,
}
