//! MergeGuard command-line front end.
//!
//! Scans branch pairs for merge conflicts, applies resolution strategies in
//! isolated worktrees, validates resolved files, and analyses branch
//! history for phased rebases.

mod analyze;
mod history;
mod resolve;
mod style;
mod validate;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mergeguard_core::config::AppConfig;
use mergeguard_core::db::Database;
use mergeguard_core::git::RepositoryOperations;
use mergeguard_core::strategy::{HttpCompletionService, StrategyGenerator};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// MergeGuard: merge-conflict detection, analysis and guarded resolution.
#[derive(Parser, Debug)]
#[command(
    name = "mergeguard",
    version,
    about = "Detect, analyse and resolve git merge conflicts"
)]
struct Cli {
    /// Path to the TOML configuration file. Defaults to ./mergeguard.toml,
    /// then the user config directory.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level or filter directive (overrides config and RUST_LOG).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also write logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan branch pairs for conflicts and propose strategies.
    Analyze {
        /// Repository path.
        #[arg(default_value = ".")]
        repo: PathBuf,

        /// Analyse a pull request head fetched from the configured remote.
        #[arg(long)]
        pr_id: Option<u64>,

        /// Branch merged into (default: `git.default_base`).
        #[arg(long)]
        base: Option<String>,

        /// Branch merged in; repeat to scan several branches. Defaults to
        /// the current branch.
        #[arg(long)]
        head: Vec<String>,

        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Apply a stored strategy to a conflict.
    Resolve {
        /// Conflict ID or unique prefix (from `analyze`).
        conflict_id: String,

        /// Strategy ID, or its `sN` suffix.
        strategy_id: String,

        /// Repository path.
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Do not ask before running strategies that require approval.
        #[arg(long)]
        yes: bool,

        /// Continue a plan suspended on a manual edit.
        #[arg(long)]
        resume: bool,
    },

    /// Validate resolved files (markers, syntax, quality, tests).
    Validate {
        /// Repository or worktree path.
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Files to check, relative to the repository. Defaults to every
        /// file changed against HEAD.
        files: Vec<String>,
    },

    /// Classify the commits of a branch and summarise their risk.
    AnalyzeHistory {
        branch: String,

        /// Only commits not in this branch (default: `git.default_base`).
        #[arg(long)]
        base: Option<String>,

        /// Write the Markdown report here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },

    /// Write a phased rebase plan for a branch.
    PlanRebase {
        branch: String,

        /// Markdown file to write.
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        base: Option<String>,

        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },

    /// List conflicts stored by previous scans.
    Conflicts {
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Number of results.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show recent audit log entries.
    Audit {
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./mergeguard.toml")]
        output: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Shared command context
// ---------------------------------------------------------------------------

/// Services every command builds from the loaded configuration.
pub struct Context {
    pub config: Arc<AppConfig>,
    pub cancel: CancellationToken,
}

impl Context {
    pub async fn open_repo(&self, path: &Path) -> Result<RepositoryOperations> {
        RepositoryOperations::open(path, &self.config.git, self.cancel.clone())
            .await
            .with_context(|| format!("failed to open repository at {}", path.display()))
    }

    /// Open the database for `repo`, under `storage.data_dir` or
    /// `<git-dir>/mergeguard`.
    pub async fn open_database(&self, repo: &RepositoryOperations) -> Result<Database> {
        let data_dir = match &self.config.storage.data_dir {
            Some(dir) => dir.clone(),
            None => repo
                .common_dir()
                .await
                .context("failed to locate git directory")?
                .join("mergeguard"),
        };
        Database::open_in(&data_dir).context("failed to open database")
    }

    /// Strategy generator, with the AI service attached when configured.
    pub fn generator(&self) -> StrategyGenerator {
        let generator = StrategyGenerator::new(self.config.execution.require_approval_above);
        if !self.config.strategy.ai.enabled {
            return generator;
        }
        match HttpCompletionService::from_config(&self.config.strategy.ai) {
            Ok(service) => generator.with_ai(Arc::new(service)),
            Err(e) => {
                warn!(error = %e, "AI strategy service unavailable");
                generator
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { output } = &cli.command {
        return cmd_init(output);
    }

    let config = load_config(cli.config.as_deref())?;
    let _guard = init_logging(&config, cli.log_level.as_deref(), cli.log_file.as_deref())?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    let ctx = Context {
        config: Arc::new(config),
        cancel,
    };

    match cli.command {
        Commands::Analyze {
            repo,
            pr_id,
            base,
            head,
            json,
        } => {
            analyze::run(
                &ctx,
                analyze::AnalyzeArgs {
                    repo,
                    pr_id,
                    base,
                    heads: head,
                    json,
                },
            )
            .await
        }
        Commands::Resolve {
            conflict_id,
            strategy_id,
            repo,
            yes,
            resume,
        } => {
            resolve::run(
                &ctx,
                resolve::ResolveArgs {
                    conflict_id,
                    strategy_id,
                    repo,
                    yes,
                    resume,
                },
            )
            .await
        }
        Commands::Validate { repo, files } => validate::run(&ctx, &repo, files).await,
        Commands::AnalyzeHistory {
            branch,
            base,
            output,
            repo,
        } => history::run_analyze(&ctx, &repo, &branch, base.as_deref(), output.as_deref()).await,
        Commands::PlanRebase {
            branch,
            output,
            base,
            repo,
        } => history::run_plan(&ctx, &repo, &branch, base.as_deref(), &output).await,
        Commands::Conflicts { repo, limit } => cmd_conflicts(&ctx, &repo, limit).await,
        Commands::Audit { repo, limit } => cmd_audit(&ctx, &repo, limit).await,
        Commands::Init { .. } => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Config & logging helpers
// ---------------------------------------------------------------------------

fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let mut config = match explicit {
        Some(path) => AppConfig::load_from_file(path).context("failed to load configuration file")?,
        None => {
            let local = PathBuf::from("mergeguard.toml");
            let user = dirs::config_dir().map(|d| d.join("mergeguard").join("config.toml"));
            let path = std::iter::once(local)
                .chain(user)
                .find(|p| p.exists())
                .unwrap_or_else(|| PathBuf::from("mergeguard.toml"));
            AppConfig::load_or_default(&path).context("failed to load configuration file")?
        }
    };
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    config.validate().context("configuration validation failed")?;
    Ok(config)
}

/// Install the stderr subscriber, plus a non-blocking file writer when a
/// log file is configured. The returned guard flushes the file on drop.
fn init_logging(
    config: &AppConfig,
    level: Option<&str>,
    log_file: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.logging.level))
            .unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    let mut guard = None;
    let file_layer = match log_file.or(config.logging.file.as_deref()) {
        Some(path) => {
            let file_name = path
                .file_name()
                .with_context(|| format!("invalid log file path: {}", path.display()))?;
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            std::fs::create_dir_all(&dir).context("failed to create log directory")?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            guard = Some(file_guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

// ---------------------------------------------------------------------------
// Small subcommands
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# MergeGuard configuration
# Every value below is the default; delete what you do not change.

[git]
binary = "git"
timeout_secs = 60
default_base = "main"
remote = "origin"
worktree_dir = "mergeguard-worktrees"

[analysis]
auto_resolve_threshold = 0.7
sensitive_keywords = ["class", "def", "async", "import"]
critical_keywords = ["auth", "security", "config", "database", "api"]
ignore_patterns = []

[strategy.ai]
enabled = false
api_url = "https://api.openai.com/v1/chat/completions"
model = "gpt-4o-mini"
api_key_env = "MERGEGUARD_AI_API_KEY"
timeout_secs = 30

[execution]
keep_backups = true
require_approval_above = "medium"

[validation]
# test_command = ["pytest", "-q"]
test_command = []
test_timeout_secs = 600
min_quality_score = 0.5

[scan]
max_concurrent_scans = 4
max_concurrent_files = 8

[storage]
# data_dir = "/var/lib/mergeguard"

[logging]
level = "warn"
# file = "mergeguard.log"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Set validation.test_command to your test suite");
    println!("  2. Optionally enable [strategy.ai] and export MERGEGUARD_AI_API_KEY");
    println!("  3. Scan a branch: mergeguard analyze --config {} --head <branch>", output.display());

    Ok(())
}

async fn cmd_conflicts(ctx: &Context, repo_path: &Path, limit: u32) -> Result<()> {
    let repo = ctx.open_repo(repo_path).await?;
    let db = ctx.open_database(&repo).await?;

    if let Some(scan) = db.list_scans(1).context("failed to list scans")?.first() {
        println!(
            "{}",
            style::dim(&format!(
                "Last scan: {} into {} at {} ({} conflicts, risk {})",
                scan.source_ref, scan.target_ref, scan.scanned_at, scan.conflict_count, scan.overall_risk
            ))
        );
    }

    let conflicts = db.list_conflicts(limit).context("failed to list conflicts")?;
    if conflicts.is_empty() {
        println!("{}", style::success("No stored conflicts"));
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["ID", "File", "Type", "Risk", "Source", "Target", "Detected"]);
    for c in &conflicts {
        table.add_row(vec![
            Cell::new(c.short_id()),
            Cell::new(c.primary_path()),
            Cell::new(c.conflict_type),
            style::risk_cell(c.risk_level),
            Cell::new(&c.source_ref),
            Cell::new(&c.target_ref),
            Cell::new(c.detected_at.format("%Y-%m-%d %H:%M")),
        ]);
    }
    println!("{}", table);
    println!("{} conflict(s) shown", conflicts.len());
    Ok(())
}

async fn cmd_audit(ctx: &Context, repo_path: &Path, limit: u32) -> Result<()> {
    let repo = ctx.open_repo(repo_path).await?;
    let db = ctx.open_database(&repo).await?;
    let entries = db
        .list_audit_log(limit)
        .context("failed to list audit entries")?;

    if entries.is_empty() {
        println!("No audit log entries found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Timestamp", "Action", "Subject", "OK", "Details"]);
    for entry in &entries {
        table.add_row(vec![
            Cell::new(&entry.created_at),
            Cell::new(&entry.action),
            Cell::new(entry.subject.as_deref().unwrap_or("")),
            Cell::new(if entry.success { "yes" } else { "no" }),
            Cell::new(truncate(entry.details.as_deref().unwrap_or(""), 60)),
        ]);
    }
    println!("{}", table);
    println!("{} entries shown", entries.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
