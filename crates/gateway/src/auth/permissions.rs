// Authorization checks against external domain collaborators.
//
// Both stores follow the membership-store seam pattern: a `Memory` variant
// for single-binary deployments and tests, with room for a variant backed by
// the upstream directory service. Lookups are awaited so a slow directory
// read never blocks other connections' message processing.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crewline_common::types::{ProjectRecord, UserIdentity};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ErrorKind, GatewayError};

/// Grants held by the external permission system, keyed by
/// `(user, permission, optional object)`.
#[derive(Clone, Default)]
pub enum PermissionBackend {
    #[default]
    Unconfigured,
    Memory(Arc<RwLock<HashSet<(Uuid, String, Option<Uuid>)>>>),
}

impl PermissionBackend {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashSet::new())))
    }

    pub async fn grant(&self, user_id: Uuid, permission: &str, obj: Option<Uuid>) {
        if let Self::Memory(grants) = self {
            grants.write().await.insert((user_id, permission.to_string(), obj));
        }
    }

    async fn has_perm(&self, user_id: Uuid, permission: &str, obj: Option<Uuid>) -> bool {
        match self {
            Self::Unconfigured => false,
            Self::Memory(grants) => {
                grants.read().await.contains(&(user_id, permission.to_string(), obj))
            }
        }
    }
}

/// The project directory collaborator.
#[derive(Clone, Default)]
pub enum ProjectDirectory {
    #[default]
    Unconfigured,
    Memory(Arc<RwLock<HashMap<Uuid, ProjectRecord>>>),
}

impl ProjectDirectory {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    pub async fn upsert(&self, project: ProjectRecord) {
        if let Self::Memory(projects) = self {
            projects.write().await.insert(project.project_id, project);
        }
    }

    async fn fetch(&self, project_id: Uuid) -> anyhow::Result<Option<ProjectRecord>> {
        match self {
            Self::Unconfigured => Ok(None),
            Self::Memory(projects) => Ok(projects.read().await.get(&project_id).cloned()),
        }
    }
}

#[derive(Clone, Default)]
pub struct PermissionChecker {
    permissions: PermissionBackend,
    projects: ProjectDirectory,
}

impl PermissionChecker {
    pub fn new(permissions: PermissionBackend, projects: ProjectDirectory) -> Self {
        Self { permissions, projects }
    }

    /// Superusers always pass; everyone else goes through the external
    /// permission backend's standard check.
    pub async fn check_permission(
        &self,
        user: &UserIdentity,
        permission: &str,
        obj: Option<Uuid>,
    ) -> bool {
        if user.is_superuser {
            return true;
        }
        self.permissions.has_perm(user.user_id, permission, obj).await
    }

    /// Project access: superuser, owner, or assigned member.
    pub async fn check_project_access(
        &self,
        user: &UserIdentity,
        project_id: Uuid,
    ) -> Result<(), GatewayError> {
        if user.is_superuser {
            return Ok(());
        }

        let project = self
            .projects
            .fetch(project_id)
            .await
            .map_err(|_| GatewayError::from_kind(ErrorKind::InternalError))?
            .ok_or_else(|| {
                GatewayError::new(ErrorKind::PermissionDenied, "Project not found")
            })?;

        if project.has_member(user.user_id) {
            Ok(())
        } else {
            Err(GatewayError::new(
                ErrorKind::PermissionDenied,
                "Access denied to this project",
            ))
        }
    }
}
