//! Plan execution.
//!
//! Steps run strictly in order against one working tree. Every file the run
//! touches is backed up first; if any step fails the plan is marked failed
//! and those files are restored. A `manual_edit` step suspends the plan
//! until [`ResolutionExecutor::resume`] is called.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::ExecutionConfig;
use crate::conflict::markers::{
    has_conflict_markers, is_current_marker, is_incoming_marker, parse_conflict_blocks,
};
use crate::conflict::merger::SemanticMerger;
use crate::errors::ExecutionError;
use crate::git::RepositoryOperations;
use crate::models::{
    Conflict, ConflictBlock, ExecutionStatus, ResolutionPlan, ResolutionStep, StepAction,
};
use crate::resolution::fs as rfs;

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed,
    /// Paused on a manual step; the plan stays in progress.
    AwaitingInput {
        step_index: usize,
        path: String,
        instructions: String,
    },
}

/// State that lives for one run of a plan.
#[derive(Default)]
struct RunContext {
    merged: HashMap<usize, String>,
    /// Per file: (original end line of a spliced block, line delta).
    shifts: HashMap<String, Vec<(usize, isize)>>,
    /// Files touched, in order, with their backup (None = did not exist).
    touched: Vec<(PathBuf, Option<PathBuf>)>,
}

impl RunContext {
    fn shift_before(&self, path: &str, line: usize) -> isize {
        self.shifts
            .get(path)
            .map(|s| s.iter().filter(|(end, _)| *end < line).map(|(_, d)| d).sum::<isize>())
            .unwrap_or(0)
    }

    fn was_touched(&self, path: &Path) -> bool {
        self.touched.iter().any(|(p, _)| p == path)
    }
}

pub struct ResolutionExecutor {
    repo: RepositoryOperations,
    merger: SemanticMerger,
    keep_backups: bool,
}

impl ResolutionExecutor {
    /// `repo` is the working tree the plan is applied to.
    pub fn new(repo: RepositoryOperations, config: &ExecutionConfig) -> Self {
        Self {
            repo,
            merger: SemanticMerger::new(),
            keep_backups: config.keep_backups,
        }
    }

    pub fn root(&self) -> &Path {
        self.repo.root()
    }

    /// Run a pending plan from its first step.
    #[instrument(skip(self, plan, conflict), fields(plan = %plan.id))]
    pub async fn execute(
        &self,
        plan: &mut ResolutionPlan,
        conflict: &Conflict,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        plan.transition(ExecutionStatus::InProgress)?;
        info!(steps = plan.steps.len(), "executing resolution plan");
        let start = plan.next_step;
        self.run_from(plan, conflict, start).await
    }

    /// Continue a plan suspended on a manual step once the file is clean.
    #[instrument(skip(self, plan, conflict), fields(plan = %plan.id))]
    pub async fn resume(
        &self,
        plan: &mut ResolutionPlan,
        conflict: &Conflict,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        if plan.status() != ExecutionStatus::InProgress {
            return Err(ExecutionError::NotSuspended(plan.id.clone()));
        }
        let Some(ResolutionStep {
            action: StepAction::ManualEdit { path, .. },
            ..
        }) = plan.steps.get(plan.next_step)
        else {
            return Err(ExecutionError::NotSuspended(plan.id.clone()));
        };

        let full = rfs::contained_path(self.repo.root(), path)?;
        let content = fs::read_to_string(&full)?;
        if has_conflict_markers(&content) {
            return Err(ExecutionError::UnresolvedMarkers(path.clone()));
        }
        info!(path = %path, "manual step completed, resuming");
        let next = plan.next_step + 1;
        self.run_from(plan, conflict, next).await
    }

    async fn run_from(
        &self,
        plan: &mut ResolutionPlan,
        conflict: &Conflict,
        start: usize,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let mut ctx = RunContext::default();

        for index in start..plan.steps.len() {
            plan.next_step = index;
            let step = plan.steps[index].clone();

            if self.repo.cancellation().is_cancelled() {
                return Err(self.abort(plan, &ctx, index, &step, "cancelled".into()));
            }

            if let StepAction::ManualEdit { path, instructions } = &step.action {
                info!(step = %step.id, path = %path, "plan suspended for manual edit");
                return Ok(ExecutionOutcome::AwaitingInput {
                    step_index: index,
                    path: path.clone(),
                    instructions: instructions.clone(),
                });
            }

            debug!(step = %step.id, action = step.action.name(), "running step");
            if let Err(e) = self.run_step(&step, conflict, &mut ctx).await {
                return Err(self.abort(plan, &ctx, index, &step, format!("{:#}", e)));
            }
        }

        plan.next_step = plan.steps.len();
        plan.transition(ExecutionStatus::Completed)?;
        if !self.keep_backups {
            for (_, backup) in &ctx.touched {
                if let Some(b) = backup {
                    if let Err(e) = fs::remove_file(b) {
                        warn!(path = %b.display(), error = %e, "failed to remove backup");
                    }
                }
            }
        }
        info!("resolution plan completed");
        Ok(ExecutionOutcome::Completed)
    }

    fn abort(
        &self,
        plan: &mut ResolutionPlan,
        ctx: &RunContext,
        index: usize,
        step: &ResolutionStep,
        detail: String,
    ) -> ExecutionError {
        warn!(step = %step.id, error = %detail, "step failed, rolling back");
        for (path, backup) in ctx.touched.iter().rev() {
            if let Err(e) = rfs::restore(path, backup.as_deref()) {
                warn!(path = %path.display(), error = %e, "rollback failed");
            }
        }
        if let Err(e) = plan.fail(format!("{}: {}", step.description, detail)) {
            warn!(error = %e, "could not mark plan failed");
        }
        ExecutionError::StepFailed {
            index,
            description: step.description.clone(),
            detail,
        }
    }

    async fn run_step(
        &self,
        step: &ResolutionStep,
        conflict: &Conflict,
        ctx: &mut RunContext,
    ) -> Result<(), ExecutionError> {
        match &step.action {
            StepAction::GitCheckout { path, side } => {
                self.track(ctx, path)?;
                self.repo.checkout_side(path, *side).await?;
                ctx.shifts.remove(path);
            }
            StepAction::GitAdd { path } => {
                rfs::check_relative(path)?;
                self.repo.add(path).await?;
            }
            StepAction::WriteFile { path, content } => {
                let full = self.track(ctx, path)?;
                rfs::atomic_write(&full, content.as_bytes())?;
                ctx.shifts.remove(path);
            }
            StepAction::SemanticMerge { block_index } => {
                let block = block_at(conflict, *block_index)?;
                let merged = self.merger.merge_block(block).ok_or_else(|| {
                    step_error(format!("block {} cannot be merged automatically", block_index))
                })?;
                ctx.merged.insert(*block_index, merged);
            }
            StepAction::ApplyMerge { block_index } => {
                let block = block_at(conflict, *block_index)?;
                let merged = ctx.merged.get(block_index).cloned().ok_or_else(|| {
                    step_error(format!("block {} has no merged content", block_index))
                })?;
                self.apply_merge(ctx, block, &merged)?;
            }
            StepAction::ManualEdit { .. } => {}
        }
        Ok(())
    }

    /// Back up `path` the first time this run touches it.
    fn track(&self, ctx: &mut RunContext, path: &str) -> Result<PathBuf, ExecutionError> {
        let full = rfs::contained_path(self.repo.root(), path)?;
        if !ctx.was_touched(&full) {
            let backup = rfs::backup(&full)?;
            ctx.touched.push((full.clone(), backup));
        }
        Ok(full)
    }

    fn apply_merge(
        &self,
        ctx: &mut RunContext,
        block: &ConflictBlock,
        merged: &str,
    ) -> Result<(), ExecutionError> {
        let path = block.file_path.as_str();
        let full = self.track(ctx, path)?;
        let content = fs::read_to_string(&full)?;

        let shift = ctx.shift_before(path, block.start_line);
        let (start, end) = locate_block(&content, block, shift).ok_or_else(|| {
            step_error(format!(
                "conflict markers for lines {}-{} not found in {}",
                block.start_line, block.end_line, path
            ))
        })?;

        let (spliced, inserted) = splice_lines(&content, start, end, merged);
        rfs::atomic_write(&full, spliced.as_bytes())?;

        let delta = inserted as isize - (end + 1 - start) as isize;
        ctx.shifts
            .entry(path.to_string())
            .or_default()
            .push((block.end_line, delta));
        debug!(path, start, end, delta, "merged block applied");
        Ok(())
    }
}

fn step_error(detail: String) -> ExecutionError {
    ExecutionError::Precondition(detail)
}

fn block_at(conflict: &Conflict, index: usize) -> Result<&ConflictBlock, ExecutionError> {
    conflict
        .blocks()
        .get(index)
        .ok_or_else(|| step_error(format!("block index {} out of range", index)))
}

/// Find the block's marker lines, first at its shifted position, then by
/// content anywhere in the file.
fn locate_block(content: &str, block: &ConflictBlock, shift: isize) -> Option<(usize, usize)> {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let start = block.start_line as isize + shift;
    let end = block.end_line as isize + shift;
    if start >= 1 && end >= start && (end as usize) <= lines.len() {
        let (s, e) = (start as usize, end as usize);
        if is_current_marker(lines[s - 1]) && is_incoming_marker(lines[e - 1]) {
            return Some((s, e));
        }
    }
    parse_conflict_blocks(&block.file_path, content)
        .into_iter()
        .find(|b| {
            b.current_content == block.current_content
                && b.incoming_content == block.incoming_content
                && b.base_content == block.base_content
        })
        .map(|b| (b.start_line, b.end_line))
}

/// Replace 1-based lines `start..=end` with `replacement`. Returns the new
/// content and the number of lines inserted.
fn splice_lines(content: &str, start: usize, end: usize, replacement: &str) -> (String, usize) {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let mut out = String::with_capacity(content.len());
    for line in &lines[..start - 1] {
        out.push_str(line);
    }
    let mut inserted = replacement.to_string();
    if !inserted.is_empty() && !inserted.ends_with('\n') && end < lines.len() {
        inserted.push('\n');
    }
    out.push_str(&inserted);
    for line in &lines[end..] {
        out.push_str(line);
    }
    (out, inserted.split_inclusive('\n').count())
}
