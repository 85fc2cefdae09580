// Identity and domain records exchanged with the gateway's external
// collaborators. The gateway never owns these; the user/permission system
// and the project directory are upstream services.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An authenticated user's identity as asserted by the auth backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: Uuid,
    pub username: String,
    pub is_active: bool,
    pub is_superuser: bool,
}

impl UserIdentity {
    pub fn active(user_id: Uuid, username: impl Into<String>) -> Self {
        Self { user_id, username: username.into(), is_active: true, is_superuser: false }
    }
}

/// Project membership data, as read from the project directory collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectRecord {
    pub project_id: Uuid,
    pub owner_id: Uuid,
    pub assigned_user_ids: Vec<Uuid>,
}

impl ProjectRecord {
    /// Whether the given user owns or is assigned to this project.
    pub fn has_member(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id || self.assigned_user_ids.contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_membership_covers_owner_and_assignees() {
        let owner = Uuid::new_v4();
        let assignee = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        let project = ProjectRecord {
            project_id: Uuid::new_v4(),
            owner_id: owner,
            assigned_user_ids: vec![assignee],
        };

        assert!(project.has_member(owner));
        assert!(project.has_member(assignee));
        assert!(!project.has_member(outsider));
    }
}
