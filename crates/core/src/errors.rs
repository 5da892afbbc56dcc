//! Error types for the MergeGuard core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// A background task panicked or was aborted.
    #[error("task failed: {0}")]
    TaskFailed(String),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from `git` subprocess invocations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The `git` binary was not found on `$PATH`.
    #[error("git binary not found: {0}")]
    BinaryNotFound(String),

    /// The path does not exist or is not inside a git work tree.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// A `git` command exited with a status the caller did not allow.
    #[error("git {args} failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        args: String,
        exit_code: i32,
        stderr: String,
    },

    /// A `git` command exceeded its timeout and was killed.
    #[error("git {args} timed out after {timeout_secs}s and was killed")]
    Timeout { args: String, timeout_secs: u64 },

    /// The caller cancelled the operation; the subprocess was killed.
    #[error("git {0} cancelled")]
    Cancelled(String),

    /// Output of a git command could not be interpreted.
    #[error("unexpected git output from {command}: {detail}")]
    UnexpectedOutput { command: String, detail: String },

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Conflict errors
// ---------------------------------------------------------------------------

/// Errors from conflict detection.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// Detection could not run at all (e.g. unknown branch, git failure).
    #[error("conflict detection failed: {0}")]
    DetectionFailed(String),

    /// `git merge-tree` failed or produced output we could not parse.
    #[error("merge-tree failed: {0}")]
    MergeTree(String),

    /// Underlying git failure.
    #[error("conflict git error: {0}")]
    Git(#[from] GitError),
}

// ---------------------------------------------------------------------------
// Workspace (worktree) errors
// ---------------------------------------------------------------------------

/// Errors from the worktree lifecycle.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// `git worktree add` failed or the target directory is unusable.
    #[error("failed to create worktree at '{path}': {detail}")]
    CreationFailed { path: String, detail: String },

    /// The requested worktree does not exist or was already removed.
    #[error("worktree unavailable: {0}")]
    Unavailable(String),

    /// Underlying git failure.
    #[error("worktree git error: {0}")]
    Git(#[from] GitError),
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// Errors raised while validating plans, steps or resolved files.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A resolution strategy cannot be turned into a plan.
    #[error("invalid plan for conflict {conflict_id}: {detail}")]
    InvalidPlan { conflict_id: String, detail: String },

    /// A single step is malformed.
    #[error("invalid step '{step}': {detail}")]
    InvalidStep { step: String, detail: String },

    /// A path resolves outside the repository root.
    #[error("path '{0}' escapes the repository root")]
    PathEscapesRepository(String),

    /// A compliance rule could not be compiled.
    #[error("invalid compliance rule: {0}")]
    Rule(#[from] regex_lite::Error),

    /// Generic I/O wrapper.
    #[error("validation I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Execution errors
// ---------------------------------------------------------------------------

/// Errors from executing a resolution plan.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A step failed; the plan was aborted.
    #[error("step {index} ({description}) failed: {detail}")]
    StepFailed {
        index: usize,
        description: String,
        detail: String,
    },

    /// A plan status change would move it backwards.
    #[error("invalid plan status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// The plan cannot be resumed from its current state.
    #[error("plan {0} is not awaiting input")]
    NotSuspended(String),

    /// A manual step cannot be completed while markers remain.
    #[error("{0} still contains conflict markers")]
    UnresolvedMarkers(String),

    /// A step's input is missing or cannot be processed.
    #[error("{0}")]
    Precondition(String),

    /// Plan construction failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Underlying git failure.
    #[error("execution git error: {0}")]
    Git(#[from] GitError),

    /// Generic I/O wrapper.
    #[error("execution I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Strategy errors
// ---------------------------------------------------------------------------

/// Errors from the optional AI strategy service.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// HTTP-level transport error.
    #[error("AI strategy HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The service returned a non-success status code.
    #[error("AI strategy service error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// The service answered with something we cannot use.
    #[error("AI strategy response rejected: {0}")]
    InvalidResponse(String),

    /// The service is configured without credentials.
    #[error("AI strategy service is not configured: {0}")]
    NotConfigured(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A stored document could not be (de)serialized.
    #[error("database document error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// An abbreviated ID matched more than one record.
    #[error("{entity} id prefix '{prefix}' is ambiguous ({matches} matches)")]
    Ambiguous {
        entity: String,
        prefix: String,
        matches: usize,
    },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = GitError::Timeout {
            args: "merge-tree".into(),
            timeout_secs: 5,
        };
        assert_eq!(
            err.to_string(),
            "git merge-tree timed out after 5s and was killed"
        );

        let err = GitError::RepositoryNotFound("/tmp/repo".into());
        assert_eq!(err.to_string(), "git repository not found at '/tmp/repo'");

        let err = ValidationError::PathEscapesRepository("../etc/passwd".into());
        assert!(err.to_string().contains("escapes the repository root"));

        let err = ExecutionError::InvalidTransition {
            from: "completed".into(),
            to: "in_progress".into(),
        };
        assert!(err.to_string().contains("completed"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let git_err = GitError::Cancelled("log".into());
        let core_err: CoreError = git_err.into();
        assert!(matches!(core_err, CoreError::Git(_)));

        let conflict_err = ConflictError::from(GitError::RefNotFound("feature".into()));
        assert!(matches!(conflict_err, ConflictError::Git(_)));

        let db_err = DatabaseError::NotFound {
            entity: "plan".into(),
            id: "abc".into(),
        };
        let core_err: CoreError = CoreError::Database(db_err);
        assert!(matches!(core_err, CoreError::Database(_)));
    }
}
