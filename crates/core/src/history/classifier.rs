//! Conventional-commit classification and history summaries.

use std::collections::BTreeMap;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Commit, CommitCategory, RiskLevel};

/// Commits touching at least this many files count as broad changes.
const BROAD_CHANGE_FILES: usize = 10;

pub struct CommitClassifier {
    header: Regex,
    critical_keywords: Vec<String>,
}

impl CommitClassifier {
    pub fn new(critical_keywords: &[String]) -> Result<Self, regex_lite::Error> {
        Ok(Self {
            header: Regex::new(r"^(\w+)(\(([^)]*)\))?(!)?:\s*(.*)")?,
            critical_keywords: critical_keywords.iter().map(|k| k.to_ascii_lowercase()).collect(),
        })
    }

    /// Fill in category, scope, breaking, merge and risk.
    pub fn classify(&self, commit: &mut Commit) {
        let subject = commit.message.lines().next().unwrap_or("").trim();
        commit.is_merge = subject.starts_with("Merge ");

        match self.header.captures(subject) {
            Some(caps) => {
                let ty = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                commit.category = Some(CommitCategory::from_type(ty));
                commit.scope = caps
                    .get(3)
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|s| !s.is_empty());
                commit.breaking = caps.get(4).is_some();
            }
            None => {
                commit.category = Some(CommitCategory::Other);
                commit.scope = None;
                commit.breaking = false;
            }
        }
        if commit.message.contains("BREAKING CHANGE") || commit.message.contains("BREAKING-CHANGE") {
            commit.breaking = true;
        }
        commit.risk_level = Some(self.risk_for(commit));
        debug!(hash = %commit.hash, category = ?commit.category, risk = ?commit.risk_level, "commit classified");
    }

    pub fn classify_all(&self, commits: &mut [Commit]) {
        for commit in commits.iter_mut() {
            self.classify(commit);
        }
    }

    fn risk_for(&self, commit: &Commit) -> RiskLevel {
        if commit.breaking {
            return RiskLevel::Critical;
        }
        let touches_critical = commit.files_changed.iter().any(|f| {
            let lower = f.to_ascii_lowercase();
            self.critical_keywords.iter().any(|k| lower.contains(k.as_str()))
        });
        if touches_critical {
            return RiskLevel::High;
        }
        let broad = commit.files_changed.len() >= BROAD_CHANGE_FILES;
        match commit.category {
            Some(CommitCategory::Refactor | CommitCategory::Perf) if broad => RiskLevel::Medium,
            _ if commit.is_merge => RiskLevel::Medium,
            Some(CommitCategory::Docs | CommitCategory::Style | CommitCategory::Test) => RiskLevel::VeryLow,
            _ => RiskLevel::Low,
        }
    }
}

/// Aggregate view of a classified history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistorySummary {
    pub total: usize,
    pub merges: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_risk: BTreeMap<RiskLevel, usize>,
    pub by_author: BTreeMap<String, usize>,
    /// Hashes of breaking commits, oldest first.
    pub breaking: Vec<String>,
}

pub fn summarize(commits: &[Commit]) -> HistorySummary {
    let mut summary = HistorySummary {
        total: commits.len(),
        ..HistorySummary::default()
    };
    let mut ordered: Vec<&Commit> = commits.iter().collect();
    ordered.sort_by_key(|c| c.date);
    for commit in ordered {
        if commit.is_merge {
            summary.merges += 1;
        }
        let category = commit.category.unwrap_or(CommitCategory::Other);
        *summary.by_category.entry(category.as_str().to_string()).or_insert(0) += 1;
        if let Some(risk) = commit.risk_level {
            *summary.by_risk.entry(risk).or_insert(0) += 1;
        }
        *summary.by_author.entry(commit.author.clone()).or_insert(0) += 1;
        if commit.breaking {
            summary.breaking.push(commit.hash.clone());
        }
    }
    summary
}

/// Markdown report for `analyze-history`.
pub fn render_history_report(branch: &str, summary: &HistorySummary, commits: &[Commit]) -> String {
    let mut out = format!("# History analysis for `{}`\n\n", branch);
    out.push_str(&format!(
        "{} commits, {} merges, {} breaking\n\n",
        summary.total,
        summary.merges,
        summary.breaking.len()
    ));

    out.push_str("## Categories\n\n");
    for (category, count) in &summary.by_category {
        out.push_str(&format!("- {}: {}\n", category, count));
    }
    out.push_str("\n## Risk\n\n");
    for (risk, count) in summary.by_risk.iter().rev() {
        out.push_str(&format!("- {}: {}\n", risk, count));
    }

    let risky: Vec<&Commit> = commits
        .iter()
        .filter(|c| c.risk_level.map(|r| r >= RiskLevel::High).unwrap_or(false))
        .collect();
    if !risky.is_empty() {
        out.push_str("\n## High-risk commits\n\n");
        for commit in risky {
            out.push_str(&format!(
                "- `{}` {} ({})\n",
                short_hash(&commit.hash),
                commit.message,
                commit.risk_level.map(|r| r.as_str()).unwrap_or("unknown")
            ));
        }
    }
    out
}

pub fn short_hash(hash: &str) -> &str {
    &hash[..7.min(hash.len())]
}
