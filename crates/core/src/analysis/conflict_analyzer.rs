//! Alignment scoring for detected conflicts.
//!
//! The alignment score is a weighted sum of four sub-scores in [0, 1]:
//! complexity (0.3), overlap (0.2), semantic compatibility (0.3) and merge
//! feasibility (0.2). Higher means easier and safer to resolve.

use tracing::debug;

use crate::analysis::ast::{normalize_whitespace, AstAnalyzer};
use crate::analysis::semantic::calculate_semantic_risk;
use crate::config::AnalysisConfig;
use crate::conflict::merger::SemanticMerger;
use crate::models::{
    AnalysisResult, Conflict, ConflictBlock, ConflictTypeExtended, RiskLevel,
    SemanticConflictDetail, StrategyType,
};

const COMPLEXITY_WEIGHT: f64 = 0.3;
const OVERLAP_WEIGHT: f64 = 0.2;
const SEMANTIC_WEIGHT: f64 = 0.3;
const FEASIBILITY_WEIGHT: f64 = 0.2;

/// Blocks larger than this are compared line-wise instead of char-wise.
const CHAR_DIFF_LIMIT: usize = 4096;

/// Size cost of a conflict: ten per hunk plus its lines, with a penalty for
/// many tiny hunks. Past the fragmentation threshold the cost never drops
/// below that of the largest fragmented conflict with the same hunk count.
pub fn conflict_cost(hunks: usize, total_lines: usize) -> f64 {
    if hunks == 0 {
        return total_lines as f64;
    }
    let h = hunks as f64;
    let t = total_lines as f64;
    let raw = h * 10.0 + t;
    if hunks > 1 {
        if total_lines < 3 * hunks {
            raw + h * 5.0
        } else {
            raw.max(18.0 * h - 1.0)
        }
    } else {
        raw
    }
}

/// Complexity sub-score: 1 for an empty conflict, falling with size.
pub fn complexity_from_size(hunks: usize, total_lines: usize) -> f64 {
    1.0 / (1.0 + conflict_cost(hunks, total_lines) / 50.0)
}

/// Weighted combination of the four sub-scores, clamped to [0, 1].
pub fn combine_scores(complexity: f64, overlap: f64, semantic: f64, feasibility: f64) -> f64 {
    (COMPLEXITY_WEIGHT * complexity
        + OVERLAP_WEIGHT * overlap
        + SEMANTIC_WEIGHT * semantic
        + FEASIBILITY_WEIGHT * feasibility)
        .clamp(0.0, 1.0)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Sub-scores behind one alignment score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentBreakdown {
    pub complexity: f64,
    pub overlap: f64,
    pub semantic: f64,
    pub feasibility: f64,
}

impl AlignmentBreakdown {
    pub fn score(&self) -> f64 {
        combine_scores(self.complexity, self.overlap, self.semantic, self.feasibility)
    }
}

#[derive(Debug, Clone)]
pub struct ConflictAnalyzer {
    ast: AstAnalyzer,
    merger: SemanticMerger,
    config: AnalysisConfig,
}

impl ConflictAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            ast: AstAnalyzer::new(),
            merger: SemanticMerger::new(),
            config,
        }
    }

    pub fn complexity_score(&self, conflict: &Conflict) -> f64 {
        let blocks = conflict.blocks();
        let total_lines = blocks.iter().map(ConflictBlock::total_lines).sum();
        complexity_from_size(blocks.len(), total_lines)
    }

    /// Mean similarity ratio between the two sides of each block.
    pub fn overlap_score(&self, conflict: &Conflict) -> f64 {
        mean(conflict.blocks().iter().map(|b| {
            let (a, c) = (b.current_content.as_str(), b.incoming_content.as_str());
            let ratio = if a.len().max(c.len()) > CHAR_DIFF_LIMIT {
                similar::TextDiff::from_lines(a, c).ratio()
            } else {
                similar::TextDiff::from_chars(a, c).ratio()
            };
            f64::from(ratio)
        }))
    }

    /// Per block: 1.0 both valid and equivalent, 0.8 both valid but
    /// divergent, 0.5 one side valid, 0.0 neither. Averaged.
    pub fn semantic_compatibility(&self, conflict: &Conflict) -> f64 {
        mean(conflict.blocks().iter().map(|b| {
            let path = b.file_path.as_str();
            let current_ok = self.ast.is_valid_for_path(path, &b.current_content);
            let incoming_ok = self.ast.is_valid_for_path(path, &b.incoming_content);
            match (current_ok, incoming_ok) {
                (true, true) => {
                    if self
                        .ast
                        .are_equivalent_for_path(path, &b.current_content, &b.incoming_content)
                    {
                        1.0
                    } else {
                        0.8
                    }
                }
                (true, false) | (false, true) => 0.5,
                (false, false) => 0.0,
            }
        }))
    }

    fn mentions_sensitive_keyword(&self, text: &str) -> bool {
        text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .any(|word| self.config.sensitive_keywords.iter().any(|k| k == word))
    }

    /// Favors whitespace-only and short differences; halved for blocks that
    /// touch definitions or imports.
    pub fn merge_feasibility(&self, conflict: &Conflict) -> f64 {
        mean(conflict.blocks().iter().map(|b| {
            if normalize_whitespace(&b.current_content) == normalize_whitespace(&b.incoming_content) {
                return 1.0;
            }
            let lines = b
                .current_content
                .lines()
                .count()
                .max(b.incoming_content.lines().count());
            let score = match lines {
                0..=3 => 0.9,
                4..=10 => 0.7,
                11..=30 => 0.4,
                _ => 0.2,
            };
            if self.mentions_sensitive_keyword(&b.current_content)
                || self.mentions_sensitive_keyword(&b.incoming_content)
            {
                score * 0.5
            } else {
                score
            }
        }))
    }

    pub fn breakdown(&self, conflict: &Conflict) -> AlignmentBreakdown {
        AlignmentBreakdown {
            complexity: self.complexity_score(conflict),
            overlap: self.overlap_score(conflict),
            semantic: self.semantic_compatibility(conflict),
            feasibility: self.merge_feasibility(conflict),
        }
    }

    pub fn calculate_alignment_score(&self, conflict: &Conflict) -> f64 {
        self.breakdown(conflict).score()
    }

    /// Full analysis of one conflict given its semantic findings.
    pub fn analyze(
        &self,
        conflict: &Conflict,
        semantic_findings: Vec<SemanticConflictDetail>,
        compliance_score: Option<f64>,
    ) -> AnalysisResult {
        let breakdown = self.breakdown(conflict);
        let alignment = breakdown.score();

        let mut risk = conflict.risk_level;
        if !semantic_findings.is_empty() {
            risk = risk.max(calculate_semantic_risk(&semantic_findings));
        }

        let is_auto_resolvable = alignment >= self.config.auto_resolve_threshold
            && !conflict.conflict_type.needs_human()
            && risk < RiskLevel::High
            && !conflict.blocks().is_empty();

        let recommended = if risk == RiskLevel::Critical {
            StrategyType::ExpertReview
        } else if risk >= RiskLevel::High || conflict.conflict_type.needs_human() {
            StrategyType::ManualResolution
        } else if is_auto_resolvable && self.merger.can_merge_all(conflict.blocks()) {
            StrategyType::SemanticMerge
        } else if is_auto_resolvable && risk <= RiskLevel::Low {
            StrategyType::AcceptIncoming
        } else {
            StrategyType::ManualResolution
        };

        let penalty = if semantic_findings.is_empty() { 1.0 } else { 0.85 };
        let confidence = ((0.5 + alignment / 2.0) * penalty).clamp(0.0, 1.0);

        let base_minutes = conflict.estimated_resolution_minutes.max(1);
        let estimated = if is_auto_resolvable {
            (base_minutes / 4).max(1)
        } else {
            base_minutes + 5 * semantic_findings.len() as u32
        };

        let root_cause = root_cause(conflict, &semantic_findings);
        debug!(
            conflict_id = %conflict.id,
            alignment,
            complexity = breakdown.complexity,
            overlap = breakdown.overlap,
            semantic = breakdown.semantic,
            feasibility = breakdown.feasibility,
            recommended = %recommended,
            "conflict analysed"
        );

        AnalysisResult {
            conflict_id: conflict.id.clone(),
            complexity_score: 1.0 - breakdown.complexity,
            alignment_score: alignment,
            risk_level: risk,
            estimated_resolution_time_minutes: estimated,
            is_auto_resolvable,
            recommended_strategy_type: recommended,
            root_cause,
            confidence_score: confidence,
            semantic_findings,
            compliance_score,
        }
    }
}

fn root_cause(conflict: &Conflict, findings: &[SemanticConflictDetail]) -> String {
    let path = conflict.primary_path();
    let base = match conflict.conflict_type {
        ConflictTypeExtended::Content => format!("both branches edited the same lines of {}", path),
        ConflictTypeExtended::Merge => format!("git could not merge {}", path),
        ConflictTypeExtended::Semantic => format!("both branches changed definitions in {}", path),
        ConflictTypeExtended::Architectural => {
            format!("both branches restructured classes in {}", path)
        }
        ConflictTypeExtended::Dependency => {
            format!("dependency manifest {} changed on both branches", path)
        }
        ConflictTypeExtended::Configuration => {
            format!("configuration file {} changed on both branches", path)
        }
        ConflictTypeExtended::AddAdd => format!("both branches added {}", path),
        ConflictTypeExtended::ModifyDelete => {
            format!("{} was modified on one branch and deleted on the other", path)
        }
        ConflictTypeExtended::Rename => format!("{} was renamed on at least one branch", path),
        ConflictTypeExtended::Binary => format!("binary file {} changed on both branches", path),
    };
    match findings.first() {
        Some(first) if findings.len() == 1 => format!("{}; {}", base, first.description),
        Some(first) => format!("{}; {} (+{} more findings)", base, first.description, findings.len() - 1),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarkerStyle;
    use proptest::prelude::*;

    fn block(path: &str, current: &str, incoming: &str) -> ConflictBlock {
        ConflictBlock {
            file_path: path.into(),
            start_line: 2,
            end_line: 6,
            current_content: current.into(),
            incoming_content: incoming.into(),
            base_content: None,
            marker_style: MarkerStyle::Merge,
        }
    }

    fn conflict(blocks: Vec<ConflictBlock>) -> Conflict {
        let path = blocks
            .first()
            .map(|b| b.file_path.clone())
            .unwrap_or_else(|| "src/app.py".into());
        Conflict::new("feature", "main", path, ConflictTypeExtended::Content, blocks)
            .with_risk(RiskLevel::Low)
            .with_estimate(8)
    }

    #[test]
    fn test_return_values_conflict() {
        let analyzer = ConflictAnalyzer::new(AnalysisConfig::default());
        let c = conflict(vec![block("src/app.py", "    return 1\n", "    return 2\n")]);
        let b = analyzer.breakdown(&c);
        assert!(b.complexity < 1.0);
        assert!((b.semantic - 0.8).abs() < 1e-9);
        assert!(b.overlap > 0.5 && b.overlap < 1.0);
        assert!((b.feasibility - 0.9).abs() < 1e-9);
        let score = analyzer.calculate_alignment_score(&c);
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn test_no_blocks() {
        let analyzer = ConflictAnalyzer::new(AnalysisConfig::default());
        let c = conflict(vec![]);
        assert_eq!(analyzer.complexity_score(&c), 1.0);
        assert_eq!(analyzer.overlap_score(&c), 0.0);
        assert!((analyzer.calculate_alignment_score(&c) - 0.3).abs() < 1e-9);
        let result = analyzer.analyze(&c, vec![], None);
        assert!(!result.is_auto_resolvable);
    }

    #[test]
    fn test_sensitive_keywords_halve_feasibility() {
        let analyzer = ConflictAnalyzer::new(AnalysisConfig::default());
        let c = conflict(vec![block("a.py", "import os\n", "import sys\n")]);
        assert!((analyzer.merge_feasibility(&c) - 0.45).abs() < 1e-9);
        let ws = conflict(vec![block("a.py", "x = 1\n", "x  = 1\n")]);
        assert_eq!(analyzer.merge_feasibility(&ws), 1.0);
    }

    #[test]
    fn test_one_sided_validity() {
        let analyzer = ConflictAnalyzer::new(AnalysisConfig::default());
        let c = conflict(vec![block("a.py", "x = (1\n", "x = 1\n")]);
        assert!((analyzer.semantic_compatibility(&c) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_equivalent_sides_recommend_semantic_merge() {
        let analyzer = ConflictAnalyzer::new(AnalysisConfig::default());
        let c = conflict(vec![block("a.py", "x = f(a,b)\n", "x = f(a, b)\n")]);
        let result = analyzer.analyze(&c, vec![], None);
        assert!(result.is_auto_resolvable);
        assert_eq!(result.recommended_strategy_type, StrategyType::SemanticMerge);
    }

    #[test]
    fn test_critical_risk_recommends_expert_review() {
        let analyzer = ConflictAnalyzer::new(AnalysisConfig::default());
        let c = conflict(vec![block("a.py", "x = 1\n", "x = 2\n")]).with_risk(RiskLevel::Critical);
        let result = analyzer.analyze(&c, vec![], Some(0.9));
        assert_eq!(result.recommended_strategy_type, StrategyType::ExpertReview);
        assert!(!result.is_auto_resolvable);
        assert_eq!(result.compliance_score, Some(0.9));
    }

    #[test]
    fn test_cost_is_monotone_at_fragmentation_boundary() {
        // 4 hunks: fragmented below 12 lines.
        assert!(conflict_cost(4, 12) >= conflict_cost(4, 11));
        assert!(conflict_cost(4, 11) > conflict_cost(4, 10));
        assert_eq!(conflict_cost(1, 2), 12.0);
    }

    proptest! {
        #[test]
        fn prop_alignment_in_unit_range(
            current in "[a-z ()=\n]{0,40}",
            incoming in "[a-z ()=\n]{0,40}",
        ) {
            let analyzer = ConflictAnalyzer::new(AnalysisConfig::default());
            let c = conflict(vec![block("a.py", &current, &incoming)]);
            let score = analyzer.calculate_alignment_score(&c);
            prop_assert!((0.0..=1.0).contains(&score));
        }

        #[test]
        fn prop_alignment_non_increasing_in_size(
            h1 in 0usize..20, dh in 0usize..20,
            t1 in 0usize..200, dt in 0usize..200,
            overlap in 0.0f64..=1.0, semantic in 0.0f64..=1.0, feasibility in 0.0f64..=1.0,
        ) {
            let small = combine_scores(complexity_from_size(h1, t1), overlap, semantic, feasibility);
            let large = combine_scores(complexity_from_size(h1 + dh, t1 + dt), overlap, semantic, feasibility);
            prop_assert!(large <= small + 1e-12);
        }
    }
}
