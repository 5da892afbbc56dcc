//! Branch-pair scans: detection, analysis, strategies and aggregate risk.
//!
//! Each scan owns its own [`RepositoryOperations`] and worktree manager, so
//! several scans run side by side without sharing git state. Concurrency is
//! bounded by `scan.max_concurrent_scans`; results come back in the order
//! they were requested.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::analysis::constitutional::ConstitutionalAnalyzer;
use crate::analysis::dependency::{DependencyAnalyzer, DependencyCycle};
use crate::analysis::{ConflictAnalyzer, RiskAssessor, RiskReport, SemanticAnalyzer};
use crate::config::AppConfig;
use crate::conflict::{ConflictDetection, GitConflictDetector};
use crate::errors::CoreError;
use crate::git::{RepositoryOperations, WorktreeManager};
use crate::models::{AnalysisResult, Conflict, ResolutionStrategy};
use crate::strategy::StrategyGenerator;

/// One branch pair to scan.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub repo_path: PathBuf,
    /// Branch being merged in. Ignored when `pr_id` is set.
    pub source: String,
    /// Branch being merged into.
    pub target: String,
    pub pr_id: Option<u64>,
}

impl ScanRequest {
    pub fn branches(repo_path: impl Into<PathBuf>, source: &str, target: &str) -> Self {
        Self {
            repo_path: repo_path.into(),
            source: source.to_string(),
            target: target.to_string(),
            pr_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictReport {
    pub conflict: Conflict,
    pub analysis: AnalysisResult,
    pub strategies: Vec<ResolutionStrategy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub source: String,
    pub target: String,
    pub conflicts: Vec<ConflictReport>,
    pub risk: RiskReport,
    /// Import cycles present in the source branch.
    pub dependency_cycles: Vec<DependencyCycle>,
    pub scanned_at: DateTime<Utc>,
}

/// What the source-branch worktree pass produced.
#[derive(Default)]
struct SourceInsights {
    compliance: HashMap<String, f64>,
    cycles: Vec<DependencyCycle>,
}

#[derive(Clone)]
pub struct ScanService {
    config: Arc<AppConfig>,
    generator: StrategyGenerator,
    cancel: CancellationToken,
}

impl ScanService {
    pub fn new(config: Arc<AppConfig>, generator: StrategyGenerator, cancel: CancellationToken) -> Self {
        Self {
            config,
            generator,
            cancel,
        }
    }

    /// Scan several pairs concurrently. The result at index `i` belongs to
    /// `requests[i]`; one failed scan does not affect the others.
    pub async fn scan_many(&self, requests: Vec<ScanRequest>) -> Vec<Result<ScanReport, CoreError>> {
        let total = requests.len();
        let semaphore = Arc::new(Semaphore::new(self.config.scan.max_concurrent_scans.max(1)));
        let mut set = JoinSet::new();

        for (index, request) in requests.into_iter().enumerate() {
            let service = self.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => service.scan(request).await,
                    Err(e) => Err(CoreError::TaskFailed(e.to_string())),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<ScanReport, CoreError>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(error = %e, "scan task failed"),
            }
        }
        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(CoreError::TaskFailed("scan did not complete".into()))))
            .collect()
    }

    #[instrument(skip(self, request), fields(repo = %request.repo_path.display(), target = %request.target))]
    pub async fn scan(&self, request: ScanRequest) -> Result<ScanReport, CoreError> {
        let config = &self.config;
        let repo = RepositoryOperations::open(&request.repo_path, &config.git, self.cancel.child_token()).await?;

        let source = match request.pr_id {
            Some(pr) => repo.fetch_pull_request(&config.git.remote, pr).await?,
            None => request.source.clone(),
        };
        info!(source = %source, "scan started");

        let detector = GitConflictDetector::new(
            repo.clone(),
            config.analysis.clone(),
            config.scan.max_concurrent_files,
        );
        let conflicts = detector.detect(&source, &request.target).await?;

        let insights = if conflicts.is_empty() {
            SourceInsights::default()
        } else {
            self.source_insights(&repo, &source, &conflicts).await
        };

        let semantic = SemanticAnalyzer::new();
        let analyzer = ConflictAnalyzer::new(config.analysis.clone());
        let mut reports = Vec::with_capacity(conflicts.len());
        for conflict in conflicts {
            let findings = semantic.analyze_conflict(&conflict);
            let compliance = insights.compliance.get(conflict.primary_path()).copied();
            let analysis = analyzer.analyze(&conflict, findings, compliance);
            let strategies = self.generator.generate_strategies(&conflict, &analysis).await;
            reports.push(ConflictReport {
                conflict,
                analysis,
                strategies,
            });
        }

        let conflicts: Vec<Conflict> = reports.iter().map(|r| r.conflict.clone()).collect();
        let analyses: Vec<AnalysisResult> = reports.iter().map(|r| r.analysis.clone()).collect();
        let risk = RiskAssessor::new(config.analysis.critical_keywords.clone()).assess(&conflicts, &analyses);

        info!(
            conflicts = reports.len(),
            overall_risk = %risk.overall_risk,
            cycles = insights.cycles.len(),
            "scan finished"
        );
        Ok(ScanReport {
            source,
            target: request.target,
            conflicts: reports,
            risk,
            dependency_cycles: insights.cycles,
            scanned_at: Utc::now(),
        })
    }

    /// Compliance scores for conflicted files and import cycles, computed in
    /// a temporary worktree of the source ref. Failures degrade to no data.
    async fn source_insights(
        &self,
        repo: &RepositoryOperations,
        source: &str,
        conflicts: &[Conflict],
    ) -> SourceInsights {
        let files: Vec<String> = conflicts
            .iter()
            .flat_map(|c| c.file_paths.iter().cloned())
            .filter(|p| p.ends_with(".py"))
            .collect();
        if files.is_empty() {
            return SourceInsights::default();
        }

        let manager = match WorktreeManager::new(repo.clone(), &self.config.git.worktree_dir).await {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "worktree manager unavailable, skipping compliance");
                return SourceInsights::default();
            }
        };

        let result = manager
            .with_worktree(source, |path| async move {
                tokio::task::spawn_blocking(move || compute_insights(&path, &files)).await
            })
            .await;

        match result {
            Ok(Ok(insights)) => insights,
            Ok(Err(e)) => {
                warn!(error = %e, "compliance task failed");
                SourceInsights::default()
            }
            Err(e) => {
                warn!(error = %e, "source worktree unavailable, skipping compliance");
                SourceInsights::default()
            }
        }
    }
}

fn compute_insights(root: &Path, files: &[String]) -> SourceInsights {
    let mut insights = SourceInsights::default();
    match ConstitutionalAnalyzer::with_default_checkers() {
        Ok(analyzer) => {
            for rel in files {
                match std::fs::read_to_string(root.join(rel)) {
                    Ok(source) => {
                        let report = analyzer.check_source(rel, &source);
                        debug!(path = %rel, score = report.score, "compliance scored");
                        insights.compliance.insert(rel.clone(), report.score);
                    }
                    Err(e) => debug!(path = %rel, error = %e, "file absent in source branch"),
                }
            }
        }
        Err(e) => warn!(error = %e, "compliance rules failed to compile"),
    }
    insights.cycles = DependencyAnalyzer::new().build_graph_from_directory(root).find_cycles();
    insights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskLevel;

    fn service() -> ScanService {
        ScanService::new(
            Arc::new(AppConfig::default()),
            StrategyGenerator::new(RiskLevel::Medium),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_scan_many_preserves_order_and_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let requests = vec![
            ScanRequest::branches(dir.path().join("missing-a"), "f", "main"),
            ScanRequest::branches(dir.path().join("missing-b"), "f", "main"),
        ];
        let results = service().scan_many(requests).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r, Err(CoreError::Git(_)))));
    }

    #[test]
    fn test_compute_insights_scores_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "import b\n").unwrap();
        std::fs::write(dir.path().join("b.py"), "import a\nx = eval('1')\n").unwrap();
        let insights = compute_insights(dir.path(), &["b.py".to_string(), "gone.py".to_string()]);
        assert!(insights.compliance.get("b.py").copied().unwrap() < 1.0);
        assert!(!insights.compliance.contains_key("gone.py"));
        assert_eq!(insights.cycles.len(), 1);
    }
}
