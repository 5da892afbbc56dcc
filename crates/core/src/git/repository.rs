//! Asynchronous wrapper around the `git` binary.
//!
//! Every invocation runs in the repository root, is bounded by the
//! configured timeout and observes a cancellation token. A command that
//! times out or is cancelled is killed and reaped before the error is
//! returned; nothing is retried here.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::DateTime;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::GitConfig;
use crate::errors::GitError;
use crate::models::{Commit, Side};

/// Raw result of a git invocation whose exit code the caller inspects.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub exit_code: i32,
}

impl GitOutput {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }
}

/// Output of `git merge-tree --write-tree --name-only`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeTreeOutput {
    /// OID of the merged tree (conflicted files contain markers).
    pub tree: String,
    /// Conflicted paths in the order git reported them.
    pub conflicted_paths: Vec<String>,
    /// Informational messages (`CONFLICT (content): ...`).
    pub messages: Vec<String>,
    pub clean: bool,
}

enum Outcome {
    Finished(std::io::Result<(Vec<u8>, Vec<u8>, std::process::ExitStatus)>),
    TimedOut,
    Cancelled,
}

/// Safe, timeout-bounded git operations against one repository (or worktree).
#[derive(Debug, Clone)]
pub struct RepositoryOperations {
    root: PathBuf,
    git_binary: String,
    timeout: Duration,
    cancel: CancellationToken,
}

impl RepositoryOperations {
    /// Open the repository containing `path`, resolving its top level.
    pub async fn open(
        path: impl AsRef<Path>,
        config: &GitConfig,
        cancel: CancellationToken,
    ) -> Result<Self, GitError> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(GitError::RepositoryNotFound(path.display().to_string()));
        }
        let probe = Self::at_path(path, config, cancel);
        let top = match probe.run(&["rev-parse", "--show-toplevel"]).await {
            Ok(out) => PathBuf::from(out.trim()),
            Err(GitError::CommandFailed { .. }) => {
                return Err(GitError::RepositoryNotFound(path.display().to_string()))
            }
            Err(e) => return Err(e),
        };
        info!(root = %top.display(), "opened git repository");
        Ok(Self { root: top, ..probe })
    }

    /// Build operations for a known work-tree path without probing it.
    pub fn at_path(path: impl Into<PathBuf>, config: &GitConfig, cancel: CancellationToken) -> Self {
        Self {
            root: path.into(),
            git_binary: config.binary.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            cancel,
        }
    }

    /// Same settings, different work tree (used for linked worktrees).
    pub fn for_worktree(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            root: path.into(),
            ..self.clone()
        }
    }

    /// Same settings with a token that never fires. Cleanup runs through
    /// this so an interrupt cannot leave worktrees registered.
    pub fn without_cancellation(&self) -> Self {
        Self {
            cancel: CancellationToken::new(),
            ..self.clone()
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git_binary(&self) -> &str {
        &self.git_binary
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    // -----------------------------------------------------------------------
    // Invocation
    // -----------------------------------------------------------------------

    /// Run git and return stdout; any non-zero exit is an error.
    pub async fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.run_allowing(args, &[0]).await?;
        Ok(output.stdout_str())
    }

    /// Run git, treating every exit code in `allowed` as success.
    pub async fn run_allowing(&self, args: &[&str], allowed: &[i32]) -> Result<GitOutput, GitError> {
        let output = self.exec(args).await?;
        if !allowed.contains(&output.exit_code) {
            warn!(
                args = %args.join(" "),
                exit_code = output.exit_code,
                stderr = %output.stderr.trim(),
                "git command failed"
            );
            return Err(GitError::CommandFailed {
                args: args.join(" "),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn exec(&self, args: &[&str]) -> Result<GitOutput, GitError> {
        let joined = args.join(" ");
        if self.cancel.is_cancelled() {
            return Err(GitError::Cancelled(joined));
        }

        let mut cmd = Command::new(&self.git_binary);
        cmd.current_dir(&self.root)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(cmd = %format!("git {}", joined), root = %self.root.display(), "running git command");
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GitError::BinaryNotFound(self.git_binary.clone())
            } else {
                GitError::IoError(e)
            }
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = tokio::select! {
            res = async { tokio::try_join!(drain(stdout), drain(stderr), child.wait()) } => {
                Outcome::Finished(res)
            }
            _ = tokio::time::sleep(self.timeout) => Outcome::TimedOut,
            _ = self.cancel.cancelled() => Outcome::Cancelled,
        };

        match outcome {
            Outcome::Finished(res) => {
                let (out, err, status) = res?;
                Ok(GitOutput {
                    stdout: out,
                    stderr: String::from_utf8_lossy(&err).to_string(),
                    exit_code: status.code().unwrap_or(-1),
                })
            }
            Outcome::TimedOut => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill timed-out git process");
                }
                warn!(args = %joined, timeout_secs = self.timeout.as_secs(), "git command timed out");
                Err(GitError::Timeout {
                    args: joined,
                    timeout_secs: self.timeout.as_secs(),
                })
            }
            Outcome::Cancelled => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill cancelled git process");
                }
                info!(args = %joined, "git command cancelled");
                Err(GitError::Cancelled(joined))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Parse `git version` into (major, minor, patch).
    pub async fn version(&self) -> Result<(u32, u32, u32), GitError> {
        let out = self.run(&["version"]).await?;
        parse_git_version(&out).ok_or_else(|| GitError::UnexpectedOutput {
            command: "version".into(),
            detail: out.trim().to_string(),
        })
    }

    /// `merge-tree --write-tree` needs git 2.38 or newer.
    pub async fn supports_write_tree(&self) -> Result<bool, GitError> {
        let version = self.version().await?;
        Ok(version >= (2, 38, 0))
    }

    pub async fn current_branch(&self) -> Result<String, GitError> {
        let out = self.run(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    /// Resolve a ref to a commit SHA.
    pub async fn resolve_ref(&self, reference: &str) -> Result<String, GitError> {
        let spec = format!("{}^{{commit}}", reference);
        match self.run(&["rev-parse", "--verify", "--quiet", &spec]).await {
            Ok(out) => Ok(out.trim().to_string()),
            Err(GitError::CommandFailed { .. }) => Err(GitError::RefNotFound(reference.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Merge base of two refs, `None` for unrelated histories.
    pub async fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>, GitError> {
        let out = self.run_allowing(&["merge-base", a, b], &[0, 1]).await?;
        let sha = out.stdout_str().trim().to_string();
        Ok(if out.exit_code == 0 && !sha.is_empty() {
            Some(sha)
        } else {
            None
        })
    }

    /// Absolute path of the common git directory (shared by all worktrees).
    pub async fn common_dir(&self) -> Result<PathBuf, GitError> {
        let out = self.run(&["rev-parse", "--git-common-dir"]).await?;
        let dir = PathBuf::from(out.trim());
        Ok(if dir.is_absolute() { dir } else { self.root.join(dir) })
    }

    /// Content of `path` at `rev`, or `None` when the file does not exist there.
    pub async fn show_file(&self, rev: &str, path: &str) -> Result<Option<Vec<u8>>, GitError> {
        let spec = format!("{}:{}", rev, path);
        let out = self.run_allowing(&["show", &spec], &[0, 128]).await?;
        if out.exit_code == 128 {
            let stderr = out.stderr.to_ascii_lowercase();
            if stderr.contains("does not exist") || stderr.contains("exists on disk, but not in") {
                return Ok(None);
            }
            return Err(GitError::CommandFailed {
                args: format!("show {}", spec),
                exit_code: 128,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(Some(out.stdout))
    }

    /// Checkout-free merge of `source` into `target`.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn merge_tree_write_tree(
        &self,
        target: &str,
        source: &str,
    ) -> Result<MergeTreeOutput, GitError> {
        let out = self
            .run_allowing(
                &[
                    "-c",
                    "merge.conflictStyle=diff3",
                    "merge-tree",
                    "--write-tree",
                    "--name-only",
                    target,
                    source,
                ],
                &[0, 1],
            )
            .await?;
        let mut parsed = parse_merge_tree_output(&out.stdout_str()).ok_or_else(|| {
            GitError::UnexpectedOutput {
                command: "merge-tree --write-tree".into(),
                detail: "missing tree OID".into(),
            }
        })?;
        parsed.clean = out.exit_code == 0;
        debug!(conflicts = parsed.conflicted_paths.len(), clean = parsed.clean, "merge-tree finished");
        Ok(parsed)
    }

    /// Legacy three-argument `merge-tree` for git older than 2.38.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn merge_tree_legacy(
        &self,
        base: &str,
        target: &str,
        source: &str,
    ) -> Result<String, GitError> {
        self.run(&["merge-tree", base, target, source]).await
    }

    /// All local and remote branch names (`git branch -a`).
    pub async fn list_branches(&self) -> Result<Vec<String>, GitError> {
        let out = self.run(&["branch", "-a"]).await?;
        Ok(parse_branch_list(&out))
    }

    /// Commits reachable from `range` (a ref or `a..b`), newest first.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn log(&self, range: &str, limit: Option<usize>) -> Result<Vec<Commit>, GitError> {
        let limit_arg = limit.map(|n| format!("--max-count={}", n));
        let mut args = vec![
            "log",
            "--pretty=format:%H|%an|%ad|%s",
            "--date=iso",
            "--name-only",
        ];
        if let Some(ref l) = limit_arg {
            args.push(l);
        }
        args.push(range);
        args.push("--");
        let out = self.run(&args).await?;
        let commits = parse_log(&out);
        debug!(count = commits.len(), "parsed git log");
        Ok(commits)
    }

    /// Fetch `pull/<id>/head` from `remote` into a local ref and return it.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn fetch_pull_request(&self, remote: &str, pr_id: u64) -> Result<String, GitError> {
        let local_ref = format!("refs/mergeguard/pr/{}", pr_id);
        let refspec = format!("+pull/{}/head:{}", pr_id, local_ref);
        self.run(&["fetch", "--no-tags", remote, &refspec]).await?;
        info!(pr_id, local_ref = %local_ref, "fetched pull request head");
        Ok(local_ref)
    }

    /// `git merge --no-commit --no-ff <source>`; returns `true` when the
    /// merge stopped with conflicts.
    pub async fn merge_no_commit(&self, source: &str) -> Result<bool, GitError> {
        let out = self
            .run_allowing(
                &[
                    "-c",
                    "merge.conflictStyle=diff3",
                    "merge",
                    "--no-commit",
                    "--no-ff",
                    source,
                ],
                &[0, 1],
            )
            .await?;
        Ok(out.exit_code == 1)
    }

    pub async fn checkout_side(&self, path: &str, side: Side) -> Result<(), GitError> {
        self.run(&["checkout", side.flag(), "--", path]).await?;
        Ok(())
    }

    pub async fn add(&self, path: &str) -> Result<(), GitError> {
        self.run(&["add", "--", path]).await?;
        Ok(())
    }

    /// Paths with uncommitted changes relative to HEAD.
    pub async fn diff_names(&self) -> Result<Vec<String>, GitError> {
        let out = self.run(&["diff", "--name-only", "HEAD"]).await?;
        Ok(non_empty_lines(&out))
    }

    /// Paths still unmerged in the index.
    pub async fn unmerged_paths(&self) -> Result<Vec<String>, GitError> {
        let out = self.run(&["diff", "--name-only", "--diff-filter=U"]).await?;
        Ok(non_empty_lines(&out))
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut r) = reader {
        r.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

fn non_empty_lines(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Output parsers
// ---------------------------------------------------------------------------

/// Parse `git version 2.39.2` (and vendor suffixes such as `.windows.1`).
pub fn parse_git_version(output: &str) -> Option<(u32, u32, u32)> {
    let version = output.trim().strip_prefix("git version ")?;
    let mut parts = version
        .split(|c: char| c == '.' || c.is_whitespace())
        .map(|p| p.parse::<u32>());
    let major = parts.next()?.ok()?;
    let minor = parts.next()?.ok()?;
    let patch = parts.next().and_then(|p| p.ok()).unwrap_or(0);
    Some((major, minor, patch))
}

/// Parse `merge-tree --write-tree --name-only` output.
pub fn parse_merge_tree_output(output: &str) -> Option<MergeTreeOutput> {
    let mut lines = output.lines();
    let tree = lines.next()?.trim().to_string();
    if tree.is_empty() {
        return None;
    }
    let mut conflicted_paths = Vec::new();
    let mut messages = Vec::new();
    let mut in_messages = false;
    for line in lines {
        if !in_messages {
            if line.is_empty() {
                in_messages = true;
                continue;
            }
            if !conflicted_paths.iter().any(|p| p == line) {
                conflicted_paths.push(line.to_string());
            }
        } else if !line.trim().is_empty() {
            messages.push(line.to_string());
        }
    }
    let clean = conflicted_paths.is_empty();
    Some(MergeTreeOutput {
        tree,
        conflicted_paths,
        messages,
        clean,
    })
}

/// Parse `git branch -a`, dropping the current-branch marker and symbolic refs.
pub fn parse_branch_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|l| l.trim_start_matches(['*', '+']).trim())
        .filter(|l| !l.is_empty() && !l.contains(" -> ") && !l.starts_with('('))
        .map(|l| l.strip_prefix("remotes/").unwrap_or(l).to_string())
        .collect()
}

/// Parse `git log --pretty=format:%H|%an|%ad|%s --date=iso --name-only`.
pub fn parse_log(output: &str) -> Vec<Commit> {
    let mut commits: Vec<Commit> = Vec::new();
    for line in output.lines() {
        if let Some(commit) = parse_log_header(line) {
            commits.push(commit);
            continue;
        }
        let file = line.trim();
        if file.is_empty() {
            continue;
        }
        if let Some(current) = commits.last_mut() {
            current.files_changed.push(file.to_string());
        }
    }
    commits
}

fn parse_log_header(line: &str) -> Option<Commit> {
    let mut parts = line.splitn(4, '|');
    let hash = parts.next()?;
    if hash.len() < 40 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let author = parts.next()?;
    let date_str = parts.next()?;
    let message = parts.next().unwrap_or("");
    let date = DateTime::parse_from_str(date_str.trim(), "%Y-%m-%d %H:%M:%S %z").ok()?;
    Some(Commit::new(hash, author, date, message))
}
