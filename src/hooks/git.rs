//! Best-effort repository metadata collection

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Repository metadata attached to the transaction context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitMetadata {
    /// Top-level directory of the working copy
    pub repo_root: PathBuf,

    /// Current branch, `HEAD` when detached
    pub branch: Option<String>,

    /// Current commit, absent in a repository with no commits
    pub commit: Option<String>,

    /// Whether the working copy has uncommitted changes
    pub dirty: bool,

    /// Generated once per working copy and cached thereafter
    pub instance_id: String,
}

/// Point-in-time repository state, before the instance id is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSnapshot {
    pub repo_root: PathBuf,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub dirty: bool,
}

impl GitSnapshot {
    /// Attach the cached instance id
    pub fn into_metadata(self, instance_id: String) -> GitMetadata {
        GitMetadata {
            repo_root: self.repo_root,
            branch: self.branch,
            commit: self.commit,
            dirty: self.dirty,
            instance_id,
        }
    }
}

/// Source of repository state for a working directory
#[async_trait]
pub trait GitCollector: Send + Sync {
    /// Returns `None` when `cwd` is not inside a repository
    async fn snapshot(&self, cwd: &Path) -> Option<GitSnapshot>;
}

/// Collector that shells out to `git`
#[derive(Debug, Clone, Default)]
pub struct CommandGitCollector;

impl CommandGitCollector {
    async fn git(cwd: &Path, args: &[&str]) -> Option<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(cwd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| debug!("git {:?} could not start: {}", args, e))
            .ok()?;

        if !output.status.success() {
            return None;
        }

        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl GitCollector for CommandGitCollector {
    async fn snapshot(&self, cwd: &Path) -> Option<GitSnapshot> {
        let root = Self::git(cwd, &["rev-parse", "--show-toplevel"]).await?;
        if root.is_empty() {
            return None;
        }

        let branch = Self::git(cwd, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await
            .filter(|b| !b.is_empty());
        let commit = Self::git(cwd, &["rev-parse", "HEAD"])
            .await
            .filter(|c| !c.is_empty());
        let dirty = Self::git(cwd, &["status", "--porcelain"])
            .await
            .map(|s| !s.is_empty())
            .unwrap_or(false);

        Some(GitSnapshot {
            repo_root: PathBuf::from(root),
            branch,
            commit,
            dirty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_not_a_repository() {
        let dir = TempDir::new().unwrap();
        // Works whether or not git is installed: both paths yield None
        let snapshot = CommandGitCollector.snapshot(dir.path()).await;
        assert!(snapshot.is_none());
    }

    #[test]
    fn test_into_metadata() {
        let snapshot = GitSnapshot {
            repo_root: PathBuf::from("/repo"),
            branch: Some("main".into()),
            commit: Some("abc".into()),
            dirty: true,
        };
        let meta = snapshot.into_metadata("inst-1".into());
        assert_eq!(meta.instance_id, "inst-1");
        assert_eq!(meta.branch.as_deref(), Some("main"));
        assert!(meta.dirty);
    }
}
