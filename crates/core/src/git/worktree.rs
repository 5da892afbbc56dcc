//! Linked-worktree lifecycle.
//!
//! Worktrees give analysis and resolution an isolated checkout without
//! touching the user's working tree. A [`Worktree`] is a scoped handle:
//! call [`Worktree::release`] when done; a handle dropped without release
//! removes its directory synchronously.

use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::errors::{GitError, WorkspaceError};
use crate::git::repository::RepositoryOperations;

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub head: Option<String>,
    /// Full ref name, e.g. `refs/heads/main`.
    pub branch: Option<String>,
    pub detached: bool,
    pub locked: bool,
    pub prunable: bool,
}

/// Handle to a worktree created by [`WorktreeManager`].
#[derive(Debug)]
pub struct Worktree {
    path: PathBuf,
    reference: String,
    repo_root: PathBuf,
    git_binary: String,
    released: bool,
}

impl Worktree {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The ref or branch checked out in this worktree.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Detach the handle from cleanup and leave the worktree on disk, e.g.
    /// while a plan waits for a manual edit.
    pub fn keep(mut self) -> PathBuf {
        self.released = true;
        std::mem::take(&mut self.path)
    }

    /// Remove the worktree (`git worktree remove --force`). Runs even after
    /// the repository's cancellation token has fired.
    pub async fn release(mut self, repo: &RepositoryOperations) -> Result<(), WorkspaceError> {
        self.released = true;
        let repo = repo.without_cancellation();
        let path = self.path.display().to_string();
        match repo.run(&["worktree", "remove", "--force", &path]).await {
            Ok(_) => {
                debug!(path = %path, "worktree removed");
                Ok(())
            }
            Err(e) => {
                warn!(path = %path, error = %e, "worktree remove failed, pruning");
                let _ = std::fs::remove_dir_all(&self.path);
                repo.run(&["worktree", "prune"]).await?;
                Ok(())
            }
        }
    }
}

impl Drop for Worktree {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(path = %self.path.display(), "worktree dropped without release, removing");
        let status = std::process::Command::new(&self.git_binary)
            .current_dir(&self.repo_root)
            .args(["worktree", "remove", "--force"])
            .arg(&self.path)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
        if !matches!(status, Ok(s) if s.success()) {
            let _ = std::fs::remove_dir_all(&self.path);
            let _ = std::process::Command::new(&self.git_binary)
                .current_dir(&self.repo_root)
                .args(["worktree", "prune"])
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status();
        }
    }
}

/// Creates, lists and removes linked worktrees of one repository.
#[derive(Debug, Clone)]
pub struct WorktreeManager {
    repo: RepositoryOperations,
    base_dir: PathBuf,
}

impl WorktreeManager {
    /// `worktree_dir` is resolved against the git common dir when relative.
    pub async fn new(
        repo: RepositoryOperations,
        worktree_dir: &Path,
    ) -> Result<Self, WorkspaceError> {
        let base_dir = if worktree_dir.is_absolute() {
            worktree_dir.to_path_buf()
        } else {
            repo.common_dir().await?.join(worktree_dir)
        };
        Ok(Self { repo, base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn repository(&self) -> &RepositoryOperations {
        &self.repo
    }

    /// Operations bound to a worktree's directory.
    pub fn operations(&self, worktree: &Worktree) -> RepositoryOperations {
        self.repo.for_worktree(worktree.path())
    }

    fn allocate_path(&self, reference: &str) -> PathBuf {
        let slug: String = reference
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
        self.base_dir.join(format!("{}-{}", slug, suffix))
    }

    fn handle(&self, path: PathBuf, reference: &str) -> Worktree {
        Worktree {
            path,
            reference: reference.to_string(),
            repo_root: self.repo.root().to_path_buf(),
            git_binary: self.repo.git_binary().to_string(),
            released: false,
        }
    }

    async fn add(&self, path: &Path, args: &[&str]) -> Result<(), WorkspaceError> {
        std::fs::create_dir_all(&self.base_dir).map_err(|e| WorkspaceError::CreationFailed {
            path: self.base_dir.display().to_string(),
            detail: e.to_string(),
        })?;
        let path_str = path.display().to_string();
        let mut full = vec!["worktree", "add"];
        full.extend_from_slice(args);
        match self.repo.run(&full).await {
            Ok(_) => Ok(()),
            Err(GitError::CommandFailed { stderr, .. }) => Err(WorkspaceError::CreationFailed {
                path: path_str,
                detail: stderr,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Check out `reference` detached in a fresh worktree.
    #[instrument(skip(self))]
    pub async fn create_detached(&self, reference: &str) -> Result<Worktree, WorkspaceError> {
        let path = self.allocate_path(reference);
        let path_str = path.display().to_string();
        self.add(&path, &["--detach", &path_str, reference]).await?;
        info!(path = %path_str, reference, "created detached worktree");
        Ok(self.handle(path, reference))
    }

    /// Create `branch` at `start_point` and check it out in a fresh worktree.
    #[instrument(skip(self))]
    pub async fn create_branch(
        &self,
        branch: &str,
        start_point: &str,
    ) -> Result<Worktree, WorkspaceError> {
        let path = self.allocate_path(branch);
        let path_str = path.display().to_string();
        self.add(&path, &["-B", branch, &path_str, start_point]).await?;
        info!(path = %path_str, branch, start_point, "created branch worktree");
        Ok(self.handle(path, branch))
    }

    /// Fetch a pull request head and check it out detached.
    #[instrument(skip(self))]
    pub async fn create_for_pull_request(
        &self,
        remote: &str,
        pr_id: u64,
    ) -> Result<Worktree, WorkspaceError> {
        let local_ref = self.repo.fetch_pull_request(remote, pr_id).await?;
        self.create_detached(&local_ref).await
    }

    pub async fn list(&self) -> Result<Vec<WorktreeInfo>, WorkspaceError> {
        let out = self.repo.run(&["worktree", "list", "--porcelain"]).await?;
        Ok(parse_worktree_list(&out))
    }

    /// Look up a worktree by path.
    pub async fn find(&self, path: &Path) -> Result<WorktreeInfo, WorkspaceError> {
        let wanted = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.list()
            .await?
            .into_iter()
            .find(|w| {
                let candidate = std::fs::canonicalize(&w.path).unwrap_or_else(|_| w.path.clone());
                candidate == wanted
            })
            .ok_or_else(|| WorkspaceError::Unavailable(path.display().to_string()))
    }

    /// Run `f` against a detached worktree of `reference`, releasing it
    /// afterwards whatever `f` returned.
    pub async fn with_worktree<F, Fut, T>(&self, reference: &str, f: F) -> Result<T, WorkspaceError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = T>,
    {
        let worktree = self.create_detached(reference).await?;
        let value = f(worktree.path().to_path_buf()).await;
        worktree.release(&self.repo).await?;
        Ok(value)
    }
}

/// Parse `git worktree list --porcelain`.
pub fn parse_worktree_list(output: &str) -> Vec<WorktreeInfo> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeInfo> = None;
    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(done) = current.take() {
                entries.push(done);
            }
            current = Some(WorktreeInfo {
                path: PathBuf::from(path),
                head: None,
                branch: None,
                detached: false,
                locked: false,
                prunable: false,
            });
            continue;
        }
        let Some(entry) = current.as_mut() else {
            continue;
        };
        if let Some(head) = line.strip_prefix("HEAD ") {
            entry.head = Some(head.to_string());
        } else if let Some(branch) = line.strip_prefix("branch ") {
            entry.branch = Some(branch.to_string());
        } else if line == "detached" {
            entry.detached = true;
        } else if line.starts_with("locked") {
            entry.locked = true;
        } else if line.starts_with("prunable") {
            entry.prunable = true;
        }
    }
    if let Some(done) = current {
        entries.push(done);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_worktree_list() {
        let out = "\
worktree /repo
HEAD 0123456789abcdef0123456789abcdef01234567
branch refs/heads/main

worktree /repo/.git/mergeguard-worktrees/feature-1a2b3c4d
HEAD 89abcdef0123456789abcdef0123456789abcdef
detached
locked reason

";
        let entries = parse_worktree_list(out);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].branch.as_deref(), Some("refs/heads/main"));
        assert!(!entries[0].detached);
        assert!(entries[1].detached);
        assert!(entries[1].locked);
        assert_eq!(
            entries[1].path,
            PathBuf::from("/repo/.git/mergeguard-worktrees/feature-1a2b3c4d")
        );
    }

    #[test]
    fn test_parse_empty_list() {
        assert!(parse_worktree_list("").is_empty());
    }
}
