//! `mergeguard resolve`: apply a stored strategy in a resolution worktree.
//!
//! The worktree sits on branch `mergeguard/resolve-<conflict>` created from
//! the target ref with the source merged in (uncommitted). It is kept when
//! the plan completes or pauses for a manual edit, and removed when a fresh
//! run fails.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use dialoguer::Confirm;
use tracing::info;

use mergeguard_core::db::Database;
use mergeguard_core::git::{RepositoryOperations, WorktreeManager};
use mergeguard_core::models::{Conflict, ResolutionPlan, ResolutionStrategy};
use mergeguard_core::resolution::{AutoResolver, ExecutionOutcome, ResolutionExecutor};
use mergeguard_core::validation::{all_passed, TestRunner, ValidationSuite};

use crate::{style, Context};

pub struct ResolveArgs {
    pub conflict_id: String,
    pub strategy_id: String,
    pub repo: PathBuf,
    pub yes: bool,
    pub resume: bool,
}

pub async fn run(ctx: &Context, args: ResolveArgs) -> Result<()> {
    let repo = ctx.open_repo(&args.repo).await?;
    let db = ctx.open_database(&repo).await?;

    let stored = db
        .find_conflict(&args.conflict_id)
        .context("failed to look up conflict")?;
    let conflict = stored.conflict;
    let strategy = db
        .find_strategy(&conflict.id, &args.strategy_id)
        .context("failed to look up strategy")?;

    let manager = WorktreeManager::new(repo.clone(), &ctx.config.git.worktree_dir)
        .await
        .context("failed to prepare worktree directory")?;
    let branch = format!("mergeguard/resolve-{}", conflict.short_id());

    if args.resume {
        resume(ctx, &db, &manager, &branch, &conflict, &strategy).await
    } else {
        start(ctx, &db, &repo, &manager, &branch, &conflict, &strategy, args.yes).await
    }
}

#[allow(clippy::too_many_arguments)]
async fn start(
    ctx: &Context,
    db: &Database,
    repo: &RepositoryOperations,
    manager: &WorktreeManager,
    branch: &str,
    conflict: &Conflict,
    strategy: &ResolutionStrategy,
    yes: bool,
) -> Result<()> {
    let mut plan = AutoResolver::new()
        .create_plan(conflict, strategy)
        .context("strategy failed validation")?;

    println!("{}", style::header(&format!("{} ({})", strategy.name, strategy.strategy_type)));
    for (i, step) in plan.steps.iter().enumerate() {
        println!("  {}. {}", i + 1, step.description);
    }
    println!();

    if strategy.requires_approval && !yes {
        let approved = Confirm::new()
            .with_prompt(format!(
                "Strategy risk is {}. Apply it to {}?",
                strategy.risk_assessment,
                conflict.primary_path()
            ))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
        if !approved {
            plan.fail("rejected by user")?;
            db.save_plan(&plan)?;
            audit(db, conflict, "rejected", false);
            println!("{}", style::warn("Resolution cancelled."));
            return Ok(());
        }
    }

    let worktree = manager
        .create_branch(branch, &conflict.target_ref)
        .await
        .context("failed to create resolution worktree")?;
    let ops = manager.operations(&worktree);
    let conflicted = ops
        .merge_no_commit(&conflict.source_ref)
        .await
        .context("failed to merge source into resolution worktree")?;
    if !conflicted {
        println!("{}", style::warn("The branches now merge cleanly; applying strategy anyway."));
    }

    let executor = ResolutionExecutor::new(ops, &ctx.config.execution);
    let outcome = executor.execute(&mut plan, conflict).await;
    db.save_plan(&plan)?;

    match outcome {
        Ok(outcome) => {
            let path = worktree.keep();
            finish(ctx, db, conflict, &plan, outcome, &path, branch).await
        }
        Err(e) => {
            audit(db, conflict, &format!("failed: {}", e), false);
            worktree
                .release(repo)
                .await
                .context("failed to remove resolution worktree")?;
            Err(e).context("resolution plan failed")
        }
    }
}

async fn resume(
    ctx: &Context,
    db: &Database,
    manager: &WorktreeManager,
    branch: &str,
    conflict: &Conflict,
    strategy: &ResolutionStrategy,
) -> Result<()> {
    let mut plan = db
        .active_plan(&conflict.id)?
        .with_context(|| format!("no suspended plan for conflict {}", conflict.short_id()))?;
    if plan.strategy_id != strategy.id {
        anyhow::bail!(
            "the suspended plan uses strategy {}, not {}",
            plan.strategy_id,
            strategy.id
        );
    }

    let path = find_worktree(manager, branch).await?;
    let executor = ResolutionExecutor::new(manager.repository().for_worktree(&path), &ctx.config.execution);
    let outcome = executor.resume(&mut plan, conflict).await;
    db.save_plan(&plan)?;

    match outcome {
        Ok(outcome) => finish(ctx, db, conflict, &plan, outcome, &path, branch).await,
        Err(e) => {
            audit(db, conflict, &format!("resume failed: {}", e), false);
            println!("{}", style::dim(&format!("Worktree left for inspection: {}", path.display())));
            Err(e).context("resolution plan failed")
        }
    }
}

async fn finish(
    ctx: &Context,
    db: &Database,
    conflict: &Conflict,
    plan: &ResolutionPlan,
    outcome: ExecutionOutcome,
    path: &Path,
    branch: &str,
) -> Result<()> {
    match outcome {
        ExecutionOutcome::AwaitingInput {
            step_index,
            path: file,
            instructions,
        } => {
            audit(db, conflict, &format!("awaiting manual edit at step {}", step_index + 1), true);
            println!("{}", style::warn(&format!("Manual edit required: {}", file)));
            println!("  {}", instructions);
            println!("  Edit {}", path.join(&file).display());
            println!();
            println!(
                "Then run: mergeguard resolve {} {} --resume",
                conflict.short_id(),
                plan.strategy_id
            );
            Ok(())
        }
        ExecutionOutcome::Completed => {
            info!(plan = %plan.id, "plan completed, validating");
            let tests = TestRunner::from_config(&ctx.config.validation, ctx.cancel.clone());
            let suite = ValidationSuite::new(&ctx.config.validation, tests)?;
            let spinner = style::spinner("Validating resolution...");
            let results = suite.validate(path, &conflict.file_paths).await;
            spinner.finish_and_clear();

            for result in &results {
                println!("{}", style::validation_line(result));
            }
            let passed = all_passed(&results);
            audit(
                db,
                conflict,
                if passed { "completed" } else { "completed, validation failed" },
                passed,
            );

            println!();
            println!("Worktree: {}", path.display());
            println!("Branch  : {}", branch);
            if passed {
                println!("{}", style::success("Resolution applied and validated. Review and commit the merge in the worktree."));
                Ok(())
            } else {
                anyhow::bail!("resolution applied but validation failed")
            }
        }
    }
}

/// Path of the worktree that has `branch` checked out.
async fn find_worktree(manager: &WorktreeManager, branch: &str) -> Result<PathBuf> {
    let wanted = format!("refs/heads/{}", branch);
    manager
        .list()
        .await
        .context("failed to list worktrees")?
        .into_iter()
        .find(|w| w.branch.as_deref() == Some(wanted.as_str()))
        .map(|w| w.path)
        .with_context(|| format!("no worktree has {} checked out", branch))
}

fn audit(db: &Database, conflict: &Conflict, details: &str, success: bool) {
    let _ = db.insert_audit_log("resolve", Some(&conflict.id), Some(details), success);
}
