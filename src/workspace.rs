//! Workspace directory lookup.
//!
//! Workspace content is owned by an external provisioner that seeds
//! starter files out of band. This module only resolves and validates
//! the per-user directory; a missing directory is a hard precondition
//! failure, never something the lifecycle repairs.

use std::path::PathBuf;

use crate::lifecycle::error::{LifecycleError, Result};

/// Resolves the persistent workspace directory for a user.
pub trait WorkspaceProvisioner: Send + Sync {
    /// The directory `user_id`'s workspace lives at. Pure mapping, no
    /// filesystem access.
    fn workspace_for(&self, user_id: i64) -> PathBuf;

    /// Returns the workspace directory after checking it exists.
    fn verify(&self, user_id: i64) -> Result<PathBuf>;
}

/// Workspaces laid out as one subdirectory per user under a root.
pub struct DirWorkspaces {
    root: PathBuf,
}

impl DirWorkspaces {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl WorkspaceProvisioner for DirWorkspaces {
    fn workspace_for(&self, user_id: i64) -> PathBuf {
        self.root.join(user_id.to_string())
    }

    fn verify(&self, user_id: i64) -> Result<PathBuf> {
        let dir = self.workspace_for(user_id);
        if !dir.is_dir() {
            return Err(LifecycleError::precondition_failed(format!(
                "workspace directory missing for user {user_id}: {}",
                dir.display()
            )));
        }
        Ok(dir)
    }
}

/// Test provisioner that accepts every user without touching the
/// filesystem.
#[cfg(test)]
pub struct StaticWorkspaces {
    root: PathBuf,
}

#[cfg(test)]
impl StaticWorkspaces {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[cfg(test)]
impl WorkspaceProvisioner for StaticWorkspaces {
    fn workspace_for(&self, user_id: i64) -> PathBuf {
        self.root.join(user_id.to_string())
    }

    fn verify(&self, user_id: i64) -> Result<PathBuf> {
        Ok(self.workspace_for(user_id))
    }
}
