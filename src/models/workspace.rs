use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Workspace role, ranked for permission checks: viewer < member < admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Member,
    Admin,
}

impl Role {
    pub fn rank(self) -> u8 {
        match self {
            Role::Viewer => 1,
            Role::Member => 2,
            Role::Admin => 3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkspaceMember {
    pub user_id: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkspaceSettings {
    pub is_public: bool,
    pub allow_invites: bool,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        WorkspaceSettings {
            is_public: false,
            allow_invites: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Workspace {
    pub workspace_id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub members: Vec<WorkspaceMember>,
    pub invite_code: Option<String>,
    pub settings: WorkspaceSettings,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    /// Creates a workspace with the owner as its sole admin member and a
    /// freshly generated invite code.
    pub fn new(owner_id: &str, name: &str, description: Option<String>) -> Self {
        Workspace {
            workspace_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description,
            owner_id: owner_id.to_string(),
            members: vec![WorkspaceMember {
                user_id: owner_id.to_string(),
                role: Role::Admin,
                joined_at: Utc::now(),
            }],
            invite_code: Some(new_invite_code()),
            settings: WorkspaceSettings::default(),
            created_at: Utc::now(),
        }
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        self.members
            .iter()
            .find(|m| m.user_id == user_id)
            .map(|m| m.role)
    }

    /// True iff the user is a member whose role rank is at least `required`.
    /// Absence of membership is not an error, just `false`.
    pub fn has_permission(&self, user_id: &str, required: Role) -> bool {
        self.role_of(user_id)
            .map_or(false, |role| role.rank() >= required.rank())
    }

    pub fn generate_invite_code(&mut self) {
        self.invite_code = Some(new_invite_code());
    }
}

/// Invite codes are two concatenated base-36 fragments, each derived from a
/// v4 UUID. Single current code per workspace; regenerating invalidates the
/// previous one immediately.
pub fn new_invite_code() -> String {
    format!(
        "{}{}",
        base36(Uuid::new_v4().as_u128()),
        base36(Uuid::new_v4().as_u128())
    )
}

fn base36(mut n: u128) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    loop {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
        if n == 0 {
            break;
        }
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace_with(owner: &str, extra: &[(&str, Role)]) -> Workspace {
        let mut ws = Workspace::new(owner, "Test workspace", None);
        for (user_id, role) in extra {
            ws.members.push(WorkspaceMember {
                user_id: (*user_id).to_string(),
                role: *role,
                joined_at: Utc::now(),
            });
        }
        ws
    }

    #[test]
    fn new_workspace_has_owner_as_sole_admin() {
        let ws = Workspace::new("u1", "Alpha", Some("desc".into()));
        assert_eq!(ws.members.len(), 1);
        assert_eq!(ws.members[0].user_id, "u1");
        assert_eq!(ws.members[0].role, Role::Admin);
        assert!(ws.invite_code.as_deref().map_or(false, |c| !c.is_empty()));
    }

    #[test]
    fn membership_checks_by_id() {
        let ws = workspace_with("u1", &[("u2", Role::Member)]);
        assert!(ws.is_member("u1"));
        assert!(ws.is_member("u2"));
        assert!(!ws.is_member("u3"));
        assert_eq!(ws.role_of("u2"), Some(Role::Member));
        assert_eq!(ws.role_of("u3"), None);
    }

    #[test]
    fn role_hierarchy_is_monotonic() {
        let ws = workspace_with(
            "u1",
            &[("viewer", Role::Viewer), ("member", Role::Member)],
        );
        // admin passes every check
        assert!(ws.has_permission("u1", Role::Viewer));
        assert!(ws.has_permission("u1", Role::Member));
        assert!(ws.has_permission("u1", Role::Admin));
        // member passes viewer+member, not admin
        assert!(ws.has_permission("member", Role::Viewer));
        assert!(ws.has_permission("member", Role::Member));
        assert!(!ws.has_permission("member", Role::Admin));
        // viewer only passes viewer
        assert!(ws.has_permission("viewer", Role::Viewer));
        assert!(!ws.has_permission("viewer", Role::Member));
        // non-member passes nothing
        assert!(!ws.has_permission("stranger", Role::Viewer));
    }

    #[test]
    fn invite_codes_are_base36_and_distinct() {
        let a = new_invite_code();
        let b = new_invite_code();
        assert_ne!(a, b);
        assert!(a.len() >= 40);
        assert!(a.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn regenerate_replaces_previous_code() {
        let mut ws = Workspace::new("u1", "Alpha", None);
        let old = ws.invite_code.clone();
        ws.generate_invite_code();
        assert_ne!(ws.invite_code, old);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).ok().as_deref(), Some("\"admin\""));
        assert_eq!(serde_json::to_string(&Role::Viewer).ok().as_deref(), Some("\"viewer\""));
    }
}
