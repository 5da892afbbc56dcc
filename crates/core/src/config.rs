//! TOML-based configuration system for MergeGuard.
//!
//! Every section has defaults, so a repository without a config file works
//! out of the box. Secrets (the AI service key) are stored as `_env` fields
//! naming environment variables and resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub git: GitConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub strategy: StrategyConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

/// Settings for git subprocess invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Git executable (default `git`).
    #[serde(default = "default_git_binary")]
    pub binary: String,

    /// Seconds before a git command is killed (default 60).
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,

    /// Branch merged into when `--base` is not given.
    #[serde(default = "default_base_branch")]
    pub default_base: String,

    /// Remote used to fetch pull-request refs.
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Directory for temporary worktrees. Relative paths are resolved
    /// against the git common dir. Default `mergeguard-worktrees`.
    #[serde(default = "default_worktree_dir")]
    pub worktree_dir: PathBuf,
}

fn default_git_binary() -> String {
    "git".into()
}
fn default_git_timeout() -> u64 {
    60
}
fn default_base_branch() -> String {
    "main".into()
}
fn default_remote() -> String {
    "origin".into()
}
fn default_worktree_dir() -> PathBuf {
    PathBuf::from("mergeguard-worktrees")
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            timeout_secs: default_git_timeout(),
            default_base: default_base_branch(),
            remote: default_remote(),
            worktree_dir: default_worktree_dir(),
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Scoring thresholds and keyword lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Minimum alignment score for a conflict to count as auto-resolvable.
    #[serde(default = "default_auto_resolve_threshold")]
    pub auto_resolve_threshold: f64,

    /// Keywords that halve merge feasibility when present in a block.
    #[serde(default = "default_sensitive_keywords")]
    pub sensitive_keywords: Vec<String>,

    /// Path fragments that mark a file as critical.
    #[serde(default = "default_critical_keywords")]
    pub critical_keywords: Vec<String>,

    /// Glob patterns for paths excluded from analysis.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

fn default_auto_resolve_threshold() -> f64 {
    0.7
}
fn default_sensitive_keywords() -> Vec<String> {
    ["class", "def", "async", "import"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_critical_keywords() -> Vec<String> {
    ["auth", "security", "config", "database", "api"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            auto_resolve_threshold: default_auto_resolve_threshold(),
            sensitive_keywords: default_sensitive_keywords(),
            critical_keywords: default_critical_keywords(),
            ignore_patterns: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Strategy generation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Optional AI completion service used for a secondary strategy.
    #[serde(default)]
    pub ai: AiConfig,
}

/// AI strategy service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Chat-completions endpoint.
    #[serde(default = "default_ai_url")]
    pub api_url: String,

    #[serde(default = "default_ai_model")]
    pub model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_ai_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,

    /// Resolved API key (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub api_key: Option<String>,
}

fn default_ai_url() -> String {
    "https://api.openai.com/v1/chat/completions".into()
}
fn default_ai_model() -> String {
    "gpt-4o-mini".into()
}
fn default_ai_key_env() -> String {
    "MERGEGUARD_AI_API_KEY".into()
}
fn default_ai_timeout() -> u64 {
    30
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: default_ai_url(),
            model: default_ai_model(),
            api_key_env: default_ai_key_env(),
            timeout_secs: default_ai_timeout(),
            api_key: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Resolution execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Keep `<file>.bak` backups after a successful plan. An existing
    /// backup is never overwritten; later ones get a numeric suffix.
    #[serde(default = "default_true")]
    pub keep_backups: bool,

    /// Strategies assessed at or above this risk require approval.
    #[serde(default = "default_approval_risk")]
    pub require_approval_above: crate::models::RiskLevel,
}

fn default_true() -> bool {
    true
}
fn default_approval_risk() -> crate::models::RiskLevel {
    crate::models::RiskLevel::Medium
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            keep_backups: true,
            require_approval_above: default_approval_risk(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Post-resolution validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Command (argv) run as the test gate, e.g. `["pytest", "-q"]`.
    #[serde(default)]
    pub test_command: Vec<String>,

    #[serde(default = "default_test_timeout")]
    pub test_timeout_secs: u64,

    /// Minimum compliance score the quality checker accepts.
    #[serde(default = "default_min_quality")]
    pub min_quality_score: f64,
}

fn default_test_timeout() -> u64 {
    600
}
fn default_min_quality() -> f64 {
    0.5
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            test_command: Vec::new(),
            test_timeout_secs: default_test_timeout(),
            min_quality_score: default_min_quality(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

/// Concurrency limits for scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Branch pairs scanned at once.
    #[serde(default = "default_max_scans")]
    pub max_concurrent_scans: usize,

    /// Files analysed at once within one scan.
    #[serde(default = "default_max_files")]
    pub max_concurrent_files: usize,
}

fn default_max_scans() -> usize {
    4
}
fn default_max_files() -> usize {
    8
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scans: default_max_scans(),
            max_concurrent_files: default_max_files(),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage and logging
// ---------------------------------------------------------------------------

/// Where analysis results and plans are persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Defaults to `<git-dir>/mergeguard` when unset.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Logging settings (CLI flags override these).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file written in addition to stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "warn".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load_from_file(&path) {
            Err(ConfigError::FileNotFound(p)) => {
                debug!(path = %p, "no configuration file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Resolve `*_env` references from the environment.
    ///
    /// A missing variable only logs a warning; the AI service is then
    /// treated as unconfigured.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if self.strategy.ai.enabled {
            self.strategy.ai.api_key =
                resolve_optional_env(&self.strategy.ai.api_key_env, "strategy.ai.api_key_env");
        }
        Ok(())
    }

    /// Validate that all values are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.git.binary.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "git.binary".into(),
                detail: "git binary must not be empty".into(),
            });
        }
        if self.git.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "git.timeout_secs".into(),
                detail: "timeout must be > 0".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.analysis.auto_resolve_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "analysis.auto_resolve_threshold".into(),
                detail: "threshold must be within [0, 1]".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.validation.min_quality_score) {
            return Err(ConfigError::InvalidValue {
                field: "validation.min_quality_score".into(),
                detail: "score must be within [0, 1]".into(),
            });
        }
        if self.scan.max_concurrent_scans == 0 || self.scan.max_concurrent_files == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scan".into(),
                detail: "concurrency limits must be > 0".into(),
            });
        }
        if self.strategy.ai.enabled && self.strategy.ai.api_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "strategy.ai.api_url".into(),
                detail: "AI service URL must not be empty when enabled".into(),
            });
        }
        Ok(())
    }

    /// Convenience: load (or default), resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_or_default(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
