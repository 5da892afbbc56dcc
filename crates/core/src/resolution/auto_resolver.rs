//! Turns a chosen strategy into an executable plan.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::errors::ValidationError;
use crate::models::{Conflict, ResolutionPlan, ResolutionStrategy, StepAction};
use crate::resolution::fs::check_relative;

#[derive(Debug, Clone, Copy, Default)]
pub struct AutoResolver;

impl AutoResolver {
    pub fn new() -> Self {
        Self
    }

    /// Check the strategy against its conflict and build a pending plan.
    pub fn create_plan(
        &self,
        conflict: &Conflict,
        strategy: &ResolutionStrategy,
    ) -> Result<ResolutionPlan, ValidationError> {
        self.validate(conflict, strategy)?;
        let plan = ResolutionPlan::new(&conflict.id, &strategy.id, strategy.steps.clone());
        info!(
            plan = %plan.id,
            conflict = %conflict.short_id(),
            strategy = %strategy.id,
            steps = plan.steps.len(),
            "resolution plan created"
        );
        Ok(plan)
    }

    pub fn validate(&self, conflict: &Conflict, strategy: &ResolutionStrategy) -> Result<(), ValidationError> {
        let invalid = |detail: String| ValidationError::InvalidPlan {
            conflict_id: conflict.id.clone(),
            detail,
        };

        if strategy.conflict_id != conflict.id {
            return Err(invalid(format!(
                "strategy {} belongs to conflict {}",
                strategy.id, strategy.conflict_id
            )));
        }
        if strategy.steps.is_empty() {
            return Err(invalid(format!("strategy {} has no steps", strategy.id)));
        }

        let block_count = conflict.blocks().len();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut merged: HashSet<usize> = HashSet::new();
        // Merged blocks not yet applied. Merge results live for one run, so
        // a plan may not suspend while any are outstanding.
        let mut unapplied: HashSet<usize> = HashSet::new();

        for step in &strategy.steps {
            let step_err = |detail: String| ValidationError::InvalidStep {
                step: step.id.clone(),
                detail,
            };

            if step.id.is_empty() {
                return Err(invalid("step with empty id".into()));
            }
            for dep in &step.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(step_err(format!("depends on '{}' which is not an earlier step", dep)));
                }
            }
            if !seen.insert(step.id.as_str()) {
                return Err(step_err("duplicate step id".into()));
            }

            if let Some(path) = step.action.path() {
                check_relative(path)?;
            }
            match &step.action {
                StepAction::SemanticMerge { block_index } => {
                    if *block_index >= block_count {
                        return Err(step_err(format!(
                            "block index {} out of range ({} blocks)",
                            block_index, block_count
                        )));
                    }
                    merged.insert(*block_index);
                    unapplied.insert(*block_index);
                }
                StepAction::ApplyMerge { block_index } => {
                    if *block_index >= block_count {
                        return Err(step_err(format!(
                            "block index {} out of range ({} blocks)",
                            block_index, block_count
                        )));
                    }
                    if !merged.contains(block_index) {
                        return Err(step_err(format!(
                            "block {} is applied before it is merged",
                            block_index
                        )));
                    }
                    unapplied.remove(block_index);
                }
                StepAction::ManualEdit { .. } if !unapplied.is_empty() => {
                    let mut pending: Vec<usize> = unapplied.iter().copied().collect();
                    pending.sort_unstable();
                    return Err(step_err(format!(
                        "manual edit suspends the plan before merged block(s) {:?} are applied",
                        pending
                    )));
                }
                _ => {}
            }
        }
        debug!(strategy = %strategy.id, "strategy validated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ConflictBlock, ConflictTypeExtended, ExecutionStatus, MarkerStyle, ResolutionStep,
        RiskLevel, StrategyType,
    };

    fn conflict() -> Conflict {
        let block = ConflictBlock {
            file_path: "app.py".into(),
            start_line: 1,
            end_line: 5,
            current_content: "a\n".into(),
            incoming_content: "b\n".into(),
            base_content: None,
            marker_style: MarkerStyle::Merge,
        };
        Conflict::new("feature", "main", "app.py", ConflictTypeExtended::Content, vec![block])
    }

    fn strategy(conflict: &Conflict, steps: Vec<ResolutionStep>) -> ResolutionStrategy {
        ResolutionStrategy {
            id: format!("{}-s1", conflict.short_id()),
            conflict_id: conflict.id.clone(),
            name: "test".into(),
            strategy_type: StrategyType::SemanticMerge,
            steps,
            estimated_time_minutes: 1,
            risk_assessment: RiskLevel::Low,
            requires_approval: false,
            confidence: 0.9,
            ai_generated: false,
            model_used: None,
        }
    }

    #[test]
    fn test_valid_plan() {
        let c = conflict();
        let s = strategy(
            &c,
            vec![
                ResolutionStep::new("m", "merge", StepAction::SemanticMerge { block_index: 0 }),
                ResolutionStep::new("a", "apply", StepAction::ApplyMerge { block_index: 0 }).after("m"),
                ResolutionStep::new("g", "add", StepAction::GitAdd { path: "app.py".into() }).after("a"),
            ],
        );
        let plan = AutoResolver::new().create_plan(&c, &s).unwrap();
        assert_eq!(plan.status(), ExecutionStatus::Pending);
        assert_eq!(plan.next_step, 0);
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.strategy_id, s.id);
    }

    #[test]
    fn test_rejects_empty_and_out_of_range() {
        let c = conflict();
        let resolver = AutoResolver::new();
        assert!(resolver.create_plan(&c, &strategy(&c, vec![])).is_err());

        let s = strategy(
            &c,
            vec![ResolutionStep::new("m", "merge", StepAction::SemanticMerge { block_index: 1 })],
        );
        assert!(matches!(
            resolver.create_plan(&c, &s),
            Err(ValidationError::InvalidStep { .. })
        ));
    }

    #[test]
    fn test_rejects_forward_dependency_and_escape() {
        let c = conflict();
        let resolver = AutoResolver::new();
        let s = strategy(
            &c,
            vec![
                ResolutionStep::new("a", "add", StepAction::GitAdd { path: "app.py".into() }).after("b"),
                ResolutionStep::new("b", "add", StepAction::GitAdd { path: "app.py".into() }),
            ],
        );
        assert!(resolver.create_plan(&c, &s).is_err());

        let s = strategy(
            &c,
            vec![ResolutionStep::new(
                "w",
                "write",
                StepAction::WriteFile {
                    path: "../outside.py".into(),
                    content: "x".into(),
                },
            )],
        );
        assert!(matches!(
            resolver.create_plan(&c, &s),
            Err(ValidationError::PathEscapesRepository(_))
        ));
    }

    #[test]
    fn test_rejects_apply_without_merge() {
        let c = conflict();
        let s = strategy(
            &c,
            vec![ResolutionStep::new("a", "apply", StepAction::ApplyMerge { block_index: 0 })],
        );
        assert!(AutoResolver::new().create_plan(&c, &s).is_err());
    }

    #[test]
    fn test_rejects_manual_edit_between_merge_and_apply() {
        let c = conflict();
        let resolver = AutoResolver::new();
        let edit = || {
            ResolutionStep::new(
                "e",
                "edit notes",
                StepAction::ManualEdit {
                    path: "NOTES.md".into(),
                    instructions: "describe the change".into(),
                },
            )
        };

        let s = strategy(
            &c,
            vec![
                ResolutionStep::new("m0", "merge", StepAction::SemanticMerge { block_index: 0 }),
                edit().after("m0"),
                ResolutionStep::new("a0", "apply", StepAction::ApplyMerge { block_index: 0 }).after("e"),
            ],
        );
        assert!(matches!(
            resolver.create_plan(&c, &s),
            Err(ValidationError::InvalidStep { ref step, .. }) if step == "e"
        ));

        // Suspending once the merge has been applied is fine.
        let s = strategy(
            &c,
            vec![
                ResolutionStep::new("m0", "merge", StepAction::SemanticMerge { block_index: 0 }),
                ResolutionStep::new("a0", "apply", StepAction::ApplyMerge { block_index: 0 }).after("m0"),
                edit().after("a0"),
            ],
        );
        assert!(resolver.create_plan(&c, &s).is_ok());
    }
}
