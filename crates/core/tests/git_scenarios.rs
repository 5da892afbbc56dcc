//! End-to-end conflict scenarios against real git repositories.
//!
//! These tests exercise detection, analysis, scans, persistence and plan
//! execution with:
//! - Local git repositories built with the `git` binary in a tempdir
//! - Real `merge-tree` / `merge` / `worktree` invocations
//! - An in-memory SQLite database
//!
//! Tests skip gracefully if `git` is not installed.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use mergeguard_core::analysis::ConflictAnalyzer;
use mergeguard_core::config::{AnalysisConfig, AppConfig, ExecutionConfig, GitConfig};
use mergeguard_core::conflict::{ConflictDetection, GitConflictDetector, SemanticMerger};
use mergeguard_core::db::Database;
use mergeguard_core::git::{RepositoryOperations, WorktreeManager};
use mergeguard_core::models::{
    Conflict, ConflictTypeExtended, ExecutionStatus, ResolutionPlan, ResolutionStep,
    ResolutionStrategy, RiskLevel, StepAction, StrategyType,
};
use mergeguard_core::resolution::{AutoResolver, ExecutionOutcome, ResolutionExecutor};
use mergeguard_core::scan::{ScanRequest, ScanService};
use mergeguard_core::strategy::StrategyGenerator;

// ===========================================================================
// Helpers
// ===========================================================================

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .current_dir(dir)
        .args([
            "-c",
            "user.name=Test User",
            "-c",
            "user.email=test@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn commit_file(dir: &Path, path: &str, content: &str, message: &str) {
    let full = dir.join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(full, content).unwrap();
    git(dir, &["add", path]);
    git(dir, &["commit", "-q", "-m", message]);
}

/// Repository with `path` committed on `main` as `base`, then changed to
/// `ours` on `main` and to `theirs` on `feature`.
fn diverged_repo(path: &str, base: &str, ours: &str, theirs: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("repo");
    std::fs::create_dir_all(&dir).unwrap();
    git(&dir, &["init", "-q"]);
    git(&dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    commit_file(&dir, path, base, "chore: initial");

    git(&dir, &["checkout", "-q", "-b", "feature"]);
    commit_file(&dir, path, theirs, "feat: change on feature");

    git(&dir, &["checkout", "-q", "main"]);
    commit_file(&dir, path, ours, "fix: change on main");
    (tmp, dir)
}

async fn open(dir: &Path) -> RepositoryOperations {
    RepositoryOperations::open(dir, &GitConfig::default(), CancellationToken::new())
        .await
        .unwrap()
}

async fn detect(repo: &RepositoryOperations) -> Vec<Conflict> {
    GitConflictDetector::new(repo.clone(), AnalysisConfig::default(), 2)
        .detect("feature", "main")
        .await
        .unwrap()
}

fn head_of(dir: &Path, branch: &str) -> git2::Oid {
    let repo = git2::Repository::open(dir).unwrap();
    let id = repo.revparse_single(branch).unwrap().id();
    id
}

fn semantic_strategy(conflict: &Conflict) -> ResolutionStrategy {
    let path = conflict.primary_path().to_string();
    ResolutionStrategy {
        id: format!("{}-s1", conflict.short_id()),
        conflict_id: conflict.id.clone(),
        name: "Semantic merge".into(),
        strategy_type: StrategyType::SemanticMerge,
        steps: vec![
            ResolutionStep::new("merge0", "merge block 0", StepAction::SemanticMerge { block_index: 0 }),
            ResolutionStep::new("apply0", "apply block 0", StepAction::ApplyMerge { block_index: 0 })
                .after("merge0"),
            ResolutionStep::new("stage", "stage file", StepAction::GitAdd { path }).after("apply0"),
        ],
        estimated_time_minutes: 1,
        risk_assessment: RiskLevel::Low,
        requires_approval: false,
        confidence: 0.9,
        ai_generated: false,
        model_used: None,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn test_disjoint_edits_have_no_conflicts() {
    if !git_available() {
        eprintln!("Skipping: git not installed");
        return;
    }
    let base: String = (1..=10).map(|n| format!("line {}\n", n)).collect();
    let ours = base.replacen("line 1\n", "line one\n", 1);
    let theirs = base.replacen("line 10\n", "line ten\n", 1);
    let (_tmp, dir) = diverged_repo("notes.txt", &base, &ours, &theirs);

    let main_before = head_of(&dir, "main");
    let repo = open(&dir).await;
    assert!(detect(&repo).await.is_empty());
    // Detection never moves refs or touches the work tree.
    assert_eq!(head_of(&dir, "main"), main_before);
    assert_eq!(std::fs::read_to_string(dir.join("notes.txt")).unwrap(), ours);
}

#[tokio::test]
async fn test_divergent_return_values_yield_one_block() {
    if !git_available() {
        eprintln!("Skipping: git not installed");
        return;
    }
    let (_tmp, dir) = diverged_repo(
        "app.py",
        "def f():\n    return 0\n",
        "def f():\n    return 1\n",
        "def f():\n    return 2\n",
    );
    let repo = open(&dir).await;
    let conflicts = detect(&repo).await;
    assert_eq!(conflicts.len(), 1);

    let conflict = &conflicts[0];
    assert_eq!(conflict.primary_path(), "app.py");
    assert_eq!(conflict.blocks().len(), 1);
    let block = &conflict.blocks()[0];
    assert!(block.current_content.contains("return 1"));
    assert!(block.incoming_content.contains("return 2"));
    assert!(block.base_content.as_deref().unwrap_or("").contains("return 0"));

    let analyzer = ConflictAnalyzer::new(AnalysisConfig::default());
    let breakdown = analyzer.breakdown(conflict);
    assert!(breakdown.complexity < 1.0);
    assert!(breakdown.semantic < 1.0);
    let score = breakdown.score();
    assert!((0.0..=1.0).contains(&score));

    // Both sides changed the same line differently: no automatic merge.
    assert!(SemanticMerger::new().merge_block(block).is_none());
}

#[tokio::test]
async fn test_identical_semantic_change_merges_in_worktree() {
    if !git_available() {
        eprintln!("Skipping: git not installed");
        return;
    }
    let (_tmp, dir) = diverged_repo(
        "calc.py",
        "x = foo(1, 2)\n",
        "x = foo(1,3)\n",
        "x = foo(1, 3)\n",
    );
    let repo = open(&dir).await;
    let conflicts = detect(&repo).await;
    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];

    let merged = SemanticMerger::new().merge_block(&conflict.blocks()[0]).unwrap();
    assert_eq!(merged.trim_end(), "x = foo(1,3)");

    let strategy = semantic_strategy(conflict);
    let mut plan = AutoResolver::new().create_plan(conflict, &strategy).unwrap();

    let manager = WorktreeManager::new(repo.clone(), Path::new("mergeguard-worktrees"))
        .await
        .unwrap();
    let worktree = manager.create_branch("mergeguard/resolve-test", "main").await.unwrap();
    let ops = manager.operations(&worktree);
    assert!(ops.merge_no_commit("feature").await.unwrap());

    let config = ExecutionConfig {
        keep_backups: false,
        ..ExecutionConfig::default()
    };
    let executor = ResolutionExecutor::new(ops.clone(), &config);
    let outcome = executor.execute(&mut plan, conflict).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Completed);
    assert_eq!(plan.status(), ExecutionStatus::Completed);

    let resolved = std::fs::read_to_string(worktree.path().join("calc.py")).unwrap();
    assert_eq!(resolved, "x = foo(1,3)\n");
    assert!(!worktree.path().join("calc.py.bak").exists());
    assert!(ops.unmerged_paths().await.unwrap().is_empty());

    // The user's checkout is untouched.
    assert_eq!(std::fs::read_to_string(dir.join("calc.py")).unwrap(), "x = foo(1,3)\n");
    let wt_path = worktree.path().to_path_buf();
    worktree.release(&repo).await.unwrap();
    assert!(!wt_path.exists());
}

#[tokio::test]
async fn test_write_outside_repository_fails_closed() {
    if !git_available() {
        eprintln!("Skipping: git not installed");
        return;
    }
    let (tmp, dir) = diverged_repo("a.py", "a = 0\n", "a = 1\n", "a = 2\n");
    let repo = open(&dir).await;
    let conflict = Conflict::new("feature", "main", "a.py", ConflictTypeExtended::Content, vec![]);

    let steps = vec![ResolutionStep::new(
        "escape",
        "write outside",
        StepAction::WriteFile {
            path: "../escape.txt".into(),
            content: "owned\n".into(),
        },
    )];

    let strategy = ResolutionStrategy {
        steps: steps.clone(),
        ..semantic_strategy(&conflict)
    };
    assert!(AutoResolver::new().create_plan(&conflict, &strategy).is_err());

    let mut plan = ResolutionPlan::new(&conflict.id, &strategy.id, steps);
    let executor = ResolutionExecutor::new(repo, &ExecutionConfig::default());
    assert!(executor.execute(&mut plan, &conflict).await.is_err());
    assert_eq!(plan.status(), ExecutionStatus::Failed);
    assert!(!tmp.path().join("escape.txt").exists());
}

#[tokio::test]
async fn test_scan_and_persist() {
    if !git_available() {
        eprintln!("Skipping: git not installed");
        return;
    }
    let (_tmp, dir) = diverged_repo(
        "src/auth/login.py",
        "def login(user):\n    return check(user)\n",
        "def login(user):\n    return check(user, strict=True)\n",
        "def login(user, token):\n    return check(user, token)\n",
    );

    let service = ScanService::new(
        Arc::new(AppConfig::default()),
        StrategyGenerator::new(RiskLevel::Medium),
        CancellationToken::new(),
    );
    let report = service
        .scan(ScanRequest::branches(&dir, "feature", "main"))
        .await
        .unwrap();
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.risk.total_conflicts, 1);
    assert_eq!(report.risk.critical_files, vec!["src/auth/login.py"]);

    let entry = &report.conflicts[0];
    assert!(!entry.strategies.is_empty());
    assert!(entry.strategies.iter().all(|s| s.conflict_id == entry.conflict.id));

    let db = Database::in_memory().unwrap();
    db.initialize().unwrap();
    db.save_scan(&dir.display().to_string(), &report).unwrap();
    let stored = db.find_conflict(entry.conflict.short_id()).unwrap();
    assert_eq!(stored.conflict.file_paths, entry.conflict.file_paths);
    assert_eq!(db.list_strategies(&entry.conflict.id).unwrap().len(), entry.strategies.len());
}

#[tokio::test]
async fn test_release_after_interrupt_unregisters_worktree() {
    if !git_available() {
        eprintln!("Skipping: git not installed");
        return;
    }
    let (_tmp, dir) = diverged_repo("a.py", "a = 0\n", "a = 1\n", "a = 2\n");
    let cancel = CancellationToken::new();
    let repo = RepositoryOperations::open(&dir, &GitConfig::default(), cancel.clone())
        .await
        .unwrap();
    let manager = WorktreeManager::new(repo.clone(), Path::new("mergeguard-worktrees"))
        .await
        .unwrap();
    let worktree = manager.create_branch("mergeguard/resolve-x", "main").await.unwrap();
    let wt_path = worktree.path().to_path_buf();

    cancel.cancel();
    worktree.release(&repo).await.unwrap();
    assert!(!wt_path.exists());

    // A later run can check the same branch out again.
    let fresh = open(&dir).await;
    let manager = WorktreeManager::new(fresh.clone(), Path::new("mergeguard-worktrees"))
        .await
        .unwrap();
    assert!(manager.list().await.unwrap().iter().all(|w| w.path != wt_path));
    let again = manager.create_branch("mergeguard/resolve-x", "main").await.unwrap();
    again.release(&fresh).await.unwrap();
}
