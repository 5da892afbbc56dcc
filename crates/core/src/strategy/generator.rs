//! Deterministic strategy generation plus the optional AI alternative.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::conflict::merger::SemanticMerger;
use crate::models::{
    AnalysisResult, Conflict, ConflictTypeExtended, ResolutionStep, ResolutionStrategy, RiskLevel,
    Side, StepAction, StrategyType,
};
use crate::strategy::ai::{build_prompt, parse_strategy_response, CompletionService};

/// Anything that can propose resolution strategies for an analysed conflict.
#[async_trait]
pub trait StrategySource: Send + Sync {
    async fn strategies(
        &self,
        conflict: &Conflict,
        analysis: &AnalysisResult,
    ) -> Vec<ResolutionStrategy>;
}

#[derive(Clone)]
pub struct StrategyGenerator {
    merger: SemanticMerger,
    ai: Option<Arc<dyn CompletionService>>,
    approval_threshold: RiskLevel,
}

impl StrategyGenerator {
    /// `approval_threshold`: strategies at or above this risk need approval.
    pub fn new(approval_threshold: RiskLevel) -> Self {
        Self {
            merger: SemanticMerger::new(),
            ai: None,
            approval_threshold,
        }
    }

    pub fn with_ai(mut self, service: Arc<dyn CompletionService>) -> Self {
        self.ai = Some(service);
        self
    }

    pub fn has_ai(&self) -> bool {
        self.ai.is_some()
    }

    /// Primary strategy first, then alternatives. Never empty.
    pub fn deterministic(&self, conflict: &Conflict, analysis: &AnalysisResult) -> Vec<ResolutionStrategy> {
        let mut ids = IdSeq::new(conflict.short_id());
        let mut out = Vec::new();

        let primary_type = self.primary_type(conflict, analysis);
        let primary = match primary_type {
            StrategyType::ExpertReview => self.expert_review(conflict, analysis, ids.next()),
            StrategyType::ManualResolution => self.manual(conflict, analysis, ids.next()),
            StrategyType::SemanticMerge => self.semantic_merge(conflict, analysis, ids.next()),
            StrategyType::AcceptIncoming => {
                self.accept(conflict, analysis, Side::Theirs, ids.next(), analysis.confidence_score, analysis.risk_level)
            }
            StrategyType::AcceptCurrent => {
                self.accept(conflict, analysis, Side::Ours, ids.next(), analysis.confidence_score, analysis.risk_level)
            }
        };
        out.push(primary);

        if offers_accept_alternatives(conflict.conflict_type) {
            let risk = analysis.risk_level.max(RiskLevel::Medium);
            let confidence = (analysis.alignment_score * 0.5).clamp(0.0, 1.0);
            for side in [Side::Theirs, Side::Ours] {
                let ty = accept_type(side);
                if ty != primary_type {
                    out.push(self.accept(conflict, analysis, side, ids.next(), confidence, risk));
                }
            }
        }
        if primary_type != StrategyType::ManualResolution && primary_type != StrategyType::ExpertReview {
            out.push(self.manual(conflict, analysis, ids.next()));
        }

        debug!(conflict = %conflict.short_id(), count = out.len(), "strategies generated");
        out
    }

    /// Deterministic strategies plus an AI strategy when a service is
    /// configured and answers with something usable.
    pub async fn generate_strategies(
        &self,
        conflict: &Conflict,
        analysis: &AnalysisResult,
    ) -> Vec<ResolutionStrategy> {
        let mut strategies = self.deterministic(conflict, analysis);
        let Some(ai) = &self.ai else {
            return strategies;
        };

        let prompt = build_prompt(conflict, analysis);
        match ai.generate(&prompt).await {
            Ok(response) => {
                let id = format!("{}-s{}", conflict.short_id(), strategies.len() + 1);
                if let Some(mut strategy) = parse_strategy_response(&response, conflict, id, ai.model()) {
                    if strategy.risk_assessment >= self.approval_threshold {
                        strategy.requires_approval = true;
                    }
                    strategies.push(strategy);
                }
            }
            Err(e) => {
                warn!(conflict = %conflict.short_id(), error = %e, "AI strategy request failed");
            }
        }
        strategies
    }

    fn primary_type(&self, conflict: &Conflict, analysis: &AnalysisResult) -> StrategyType {
        if analysis.risk_level == RiskLevel::Critical {
            return StrategyType::ExpertReview;
        }
        if analysis.risk_level >= RiskLevel::High || conflict.conflict_type.needs_human() {
            return StrategyType::ManualResolution;
        }
        match analysis.recommended_strategy_type {
            StrategyType::SemanticMerge
                if analysis.is_auto_resolvable && self.merger.can_merge_all(conflict.blocks()) =>
            {
                StrategyType::SemanticMerge
            }
            StrategyType::SemanticMerge => StrategyType::ManualResolution,
            other => other,
        }
    }

    fn requires_approval(&self, risk: RiskLevel) -> bool {
        risk >= self.approval_threshold
    }

    fn expert_review(&self, conflict: &Conflict, analysis: &AnalysisResult, id: String) -> ResolutionStrategy {
        let path = conflict.primary_path().to_string();
        let steps = vec![
            ResolutionStep::new(
                "review",
                format!("Escalate {} to a code owner", path),
                StepAction::ManualEdit {
                    path: path.clone(),
                    instructions: format!(
                        "Critical conflict ({}). Have a code owner resolve it: {}",
                        conflict.conflict_type, analysis.root_cause
                    ),
                },
            ),
            stage_step("stage", &path).after("review"),
        ];
        ResolutionStrategy {
            id,
            conflict_id: conflict.id.clone(),
            name: "Expert review".into(),
            strategy_type: StrategyType::ExpertReview,
            steps,
            estimated_time_minutes: analysis.estimated_resolution_time_minutes.max(30) * 2,
            risk_assessment: analysis.risk_level,
            requires_approval: true,
            confidence: 0.9,
            ai_generated: false,
            model_used: None,
        }
    }

    fn manual(&self, conflict: &Conflict, analysis: &AnalysisResult, id: String) -> ResolutionStrategy {
        let path = conflict.primary_path().to_string();
        let mut instructions = format!(
            "Resolve the {} conflict markers by hand. {}",
            conflict.blocks().len(),
            analysis.root_cause
        );
        for finding in &analysis.semantic_findings {
            instructions.push_str(&format!("\n- {}", finding.description));
        }
        let steps = vec![
            ResolutionStep::new(
                "edit",
                format!("Edit {} manually", path),
                StepAction::ManualEdit {
                    path: path.clone(),
                    instructions,
                },
            ),
            stage_step("stage", &path).after("edit"),
        ];
        ResolutionStrategy {
            id,
            conflict_id: conflict.id.clone(),
            name: "Manual resolution".into(),
            strategy_type: StrategyType::ManualResolution,
            steps,
            estimated_time_minutes: analysis.estimated_resolution_time_minutes.max(1),
            risk_assessment: analysis.risk_level,
            requires_approval: self.requires_approval(analysis.risk_level),
            confidence: analysis.confidence_score.clamp(0.0, 1.0),
            ai_generated: false,
            model_used: None,
        }
    }

    fn semantic_merge(&self, conflict: &Conflict, analysis: &AnalysisResult, id: String) -> ResolutionStrategy {
        let path = conflict.primary_path().to_string();
        let mut steps = Vec::new();
        let mut last = None;
        for index in 0..conflict.blocks().len() {
            let merge_id = format!("merge{}", index);
            let apply_id = format!("apply{}", index);
            steps.push(ResolutionStep::new(
                merge_id.clone(),
                format!("Merge block {} of {}", index, path),
                StepAction::SemanticMerge { block_index: index },
            ));
            steps.push(
                ResolutionStep::new(
                    apply_id.clone(),
                    format!("Apply merged block {} to {}", index, path),
                    StepAction::ApplyMerge { block_index: index },
                )
                .after(merge_id),
            );
            last = Some(apply_id);
        }
        let mut stage = stage_step("stage", &path);
        if let Some(dep) = last {
            stage = stage.after(dep);
        }
        steps.push(stage);

        ResolutionStrategy {
            id,
            conflict_id: conflict.id.clone(),
            name: "Semantic merge".into(),
            strategy_type: StrategyType::SemanticMerge,
            steps,
            estimated_time_minutes: (analysis.estimated_resolution_time_minutes / 4).max(1),
            risk_assessment: analysis.risk_level,
            requires_approval: self.requires_approval(analysis.risk_level),
            confidence: analysis.confidence_score.clamp(0.0, 1.0),
            ai_generated: false,
            model_used: None,
        }
    }

    fn accept(
        &self,
        conflict: &Conflict,
        analysis: &AnalysisResult,
        side: Side,
        id: String,
        confidence: f64,
        risk: RiskLevel,
    ) -> ResolutionStrategy {
        let path = conflict.primary_path().to_string();
        let (name, label) = match side {
            Side::Theirs => ("Accept incoming", conflict.source_ref.as_str()),
            Side::Ours => ("Accept current", conflict.target_ref.as_str()),
        };
        let steps = vec![
            ResolutionStep::new(
                "checkout",
                format!("Take {} from {}", path, label),
                StepAction::GitCheckout {
                    path: path.clone(),
                    side,
                },
            ),
            stage_step("stage", &path).after("checkout"),
        ];
        ResolutionStrategy {
            id,
            conflict_id: conflict.id.clone(),
            name: name.into(),
            strategy_type: accept_type(side),
            steps,
            estimated_time_minutes: analysis.estimated_resolution_time_minutes.clamp(1, 2),
            risk_assessment: risk,
            requires_approval: self.requires_approval(risk),
            confidence,
            ai_generated: false,
            model_used: None,
        }
    }
}

#[async_trait]
impl StrategySource for StrategyGenerator {
    async fn strategies(
        &self,
        conflict: &Conflict,
        analysis: &AnalysisResult,
    ) -> Vec<ResolutionStrategy> {
        self.generate_strategies(conflict, analysis).await
    }
}

struct IdSeq<'a> {
    prefix: &'a str,
    n: usize,
}

impl<'a> IdSeq<'a> {
    fn new(prefix: &'a str) -> Self {
        Self { prefix, n: 0 }
    }

    fn next(&mut self) -> String {
        self.n += 1;
        format!("{}-s{}", self.prefix, self.n)
    }
}

fn stage_step(id: &str, path: &str) -> ResolutionStep {
    ResolutionStep::new(
        id,
        format!("Stage {}", path),
        StepAction::GitAdd { path: path.to_string() },
    )
}

fn accept_type(side: Side) -> StrategyType {
    match side {
        Side::Theirs => StrategyType::AcceptIncoming,
        Side::Ours => StrategyType::AcceptCurrent,
    }
}

fn offers_accept_alternatives(ty: ConflictTypeExtended) -> bool {
    matches!(
        ty,
        ConflictTypeExtended::Content
            | ConflictTypeExtended::AddAdd
            | ConflictTypeExtended::Merge
            | ConflictTypeExtended::Configuration
            | ConflictTypeExtended::Dependency
            | ConflictTypeExtended::Binary
    )
}
