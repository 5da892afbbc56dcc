//! Aggregate risk over all conflicts of a scan.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::models::{AnalysisResult, Conflict, ConflictTypeExtended, RiskLevel};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    pub total_conflicts: usize,
    pub by_severity: BTreeMap<RiskLevel, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub critical_files: Vec<String>,
    /// Mean severity weight in [0, 1]; higher is riskier.
    pub risk_score: f64,
    pub overall_risk: RiskLevel,
    pub mitigation_strategies: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RiskAssessor {
    critical_keywords: Vec<String>,
}

impl RiskAssessor {
    pub fn new(critical_keywords: Vec<String>) -> Self {
        Self {
            critical_keywords: critical_keywords
                .into_iter()
                .map(|k| k.to_ascii_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn is_critical_file(&self, path: &str) -> bool {
        let lower = path.to_ascii_lowercase();
        self.critical_keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// Aggregate conflicts, preferring the analysed risk when available.
    pub fn assess(&self, conflicts: &[Conflict], analyses: &[AnalysisResult]) -> RiskReport {
        let analysed: HashMap<&str, RiskLevel> = analyses
            .iter()
            .map(|a| (a.conflict_id.as_str(), a.risk_level))
            .collect();

        let mut by_severity = BTreeMap::new();
        let mut by_type = BTreeMap::new();
        let mut critical_files = Vec::new();
        let mut weight_sum = 0.0;

        for conflict in conflicts {
            let level = analysed
                .get(conflict.id.as_str())
                .copied()
                .unwrap_or(conflict.risk_level);
            *by_severity.entry(level).or_insert(0) += 1;
            *by_type
                .entry(conflict.conflict_type.as_str().to_string())
                .or_insert(0) += 1;
            weight_sum += level.weight();
            for path in &conflict.file_paths {
                if self.is_critical_file(path) && !critical_files.contains(path) {
                    critical_files.push(path.clone());
                }
            }
        }

        let total = conflicts.len();
        let risk_score = if total == 0 {
            0.0
        } else {
            weight_sum / total as f64
        };
        let overall_risk = overall(risk_score);
        let count = |l: RiskLevel| by_severity.get(&l).copied().unwrap_or(0);
        let has_type = |t: ConflictTypeExtended| by_type.contains_key(t.as_str());

        let mut mitigation_strategies = Vec::new();
        if count(RiskLevel::Critical) > 0 {
            mitigation_strategies
                .push("Have a code owner review every critical conflict before merging".to_string());
        }
        if !critical_files.is_empty() {
            mitigation_strategies.push(format!(
                "Pair-review changes to critical files: {}",
                critical_files.join(", ")
            ));
        }
        if has_type(ConflictTypeExtended::Semantic) || has_type(ConflictTypeExtended::Architectural) {
            mitigation_strategies
                .push("Run the full test suite after resolving semantic conflicts".to_string());
        }
        if has_type(ConflictTypeExtended::Dependency) {
            mitigation_strategies
                .push("Regenerate lock files instead of merging them by hand".to_string());
        }
        if risk_score >= 0.6 {
            mitigation_strategies
                .push("Split the merge: rebase the branch in phases and resolve incrementally".to_string());
        }

        let mut recommendations = Vec::new();
        if total == 0 {
            recommendations.push("No conflicts: the branches merge cleanly".to_string());
        } else if risk_score < 0.35 {
            recommendations
                .push("Low overall risk: apply automatic strategies where offered".to_string());
        } else if risk_score < 0.6 {
            recommendations.push(
                "Moderate risk: review each strategy before applying it".to_string(),
            );
        } else {
            recommendations.push(
                "High risk: resolve manually and validate with tests before merging".to_string(),
            );
        }
        if total > 10 {
            recommendations
                .push("Many conflicts: consider merging the target branch into the source more often".to_string());
        }

        RiskReport {
            total_conflicts: total,
            by_severity,
            by_type,
            critical_files,
            risk_score,
            overall_risk,
            mitigation_strategies,
            recommendations,
        }
    }
}

fn overall(score: f64) -> RiskLevel {
    if score >= 0.8 {
        RiskLevel::Critical
    } else if score >= 0.6 {
        RiskLevel::High
    } else if score >= 0.35 {
        RiskLevel::Medium
    } else if score >= 0.1 {
        RiskLevel::Low
    } else {
        RiskLevel::VeryLow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StrategyType;

    fn conflict(path: &str, ty: ConflictTypeExtended, risk: RiskLevel) -> Conflict {
        Conflict::new("feature", "main", path, ty, vec![]).with_risk(risk)
    }

    fn assessor() -> RiskAssessor {
        RiskAssessor::new(vec!["auth".into(), "config".into()])
    }

    #[test]
    fn test_empty_report() {
        let report = assessor().assess(&[], &[]);
        assert_eq!(report.total_conflicts, 0);
        assert_eq!(report.risk_score, 0.0);
        assert_eq!(report.overall_risk, RiskLevel::VeryLow);
        assert!(report.mitigation_strategies.is_empty());
    }

    #[test]
    fn test_buckets_and_score() {
        let conflicts = vec![
            conflict("src/auth/login.py", ConflictTypeExtended::Semantic, RiskLevel::Critical),
            conflict("src/app.py", ConflictTypeExtended::Content, RiskLevel::Low),
        ];
        let report = assessor().assess(&conflicts, &[]);
        assert_eq!(report.by_severity.get(&RiskLevel::Critical), Some(&1));
        assert_eq!(report.by_type.get("content"), Some(&1));
        assert_eq!(report.critical_files, vec!["src/auth/login.py"]);
        assert!((report.risk_score - 0.55).abs() < 1e-9);
        assert_eq!(report.overall_risk, RiskLevel::Medium);
        assert!(report.mitigation_strategies.len() >= 3);
    }

    #[test]
    fn test_analysed_risk_overrides() {
        let c = conflict("src/app.py", ConflictTypeExtended::Content, RiskLevel::Low);
        let analysis = AnalysisResult {
            conflict_id: c.id.clone(),
            complexity_score: 0.5,
            alignment_score: 0.2,
            risk_level: RiskLevel::Critical,
            estimated_resolution_time_minutes: 30,
            is_auto_resolvable: false,
            recommended_strategy_type: StrategyType::ExpertReview,
            root_cause: String::new(),
            confidence_score: 0.5,
            semantic_findings: vec![],
            compliance_score: None,
        };
        let report = assessor().assess(&[c], &[analysis]);
        assert_eq!(report.risk_score, 1.0);
        assert_eq!(report.overall_risk, RiskLevel::Critical);
    }
}
