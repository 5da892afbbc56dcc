//! Phased rebase planning.
//!
//! Commits are grouped so that risky and infrastructure changes land first,
//! then features, then fixes, then everything else. Inside a phase commits
//! keep their chronological order.

use serde::{Deserialize, Serialize};

use crate::history::classifier::short_hash;
use crate::models::{Commit, CommitCategory, RiskLevel};

pub const PHASE_TITLES: [&str; 4] = [
    "Infrastructure and high-risk changes",
    "Features",
    "Fixes",
    "Documentation and other changes",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebasePhase {
    /// 1-based.
    pub number: usize,
    pub title: String,
    pub commits: Vec<Commit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebasePlan {
    pub branch: String,
    pub phases: Vec<RebasePhase>,
}

/// Phase (1-4) a classified commit belongs to.
pub fn phase_for(commit: &Commit) -> usize {
    let risky = commit.risk_level.map(|r| r >= RiskLevel::High).unwrap_or(false);
    match commit.category {
        _ if risky => 1,
        Some(c) if c.is_infrastructure() => 1,
        Some(CommitCategory::Feat) => 2,
        Some(CommitCategory::Fix) => 3,
        _ => 4,
    }
}

pub struct RebasePlanner;

impl RebasePlanner {
    pub fn plan(branch: &str, commits: &[Commit]) -> RebasePlan {
        let mut phases: Vec<RebasePhase> = PHASE_TITLES
            .iter()
            .enumerate()
            .map(|(i, title)| RebasePhase {
                number: i + 1,
                title: (*title).to_string(),
                commits: Vec::new(),
            })
            .collect();

        let mut ordered: Vec<&Commit> = commits.iter().collect();
        // Stable: commits with equal timestamps keep their input order.
        ordered.sort_by_key(|c| c.date);
        for commit in ordered {
            phases[phase_for(commit) - 1].commits.push(commit.clone());
        }
        RebasePlan {
            branch: branch.to_string(),
            phases,
        }
    }
}

impl RebasePlan {
    /// Commits in the order they should be replayed.
    pub fn ordered(&self) -> impl Iterator<Item = &Commit> {
        self.phases.iter().flat_map(|p| p.commits.iter())
    }

    pub fn commit_count(&self) -> usize {
        self.phases.iter().map(|p| p.commits.len()).sum()
    }

    pub fn render_markdown(&self) -> String {
        let mut out = format!("# Rebase plan for `{}`\n\n", self.branch);
        out.push_str(&format!(
            "{} commits in {} phases. Replay each phase with `git rebase -i` and run the tests before moving on.\n",
            self.commit_count(),
            self.phases.len()
        ));
        for phase in &self.phases {
            out.push_str(&format!("\n## Phase {}: {}\n\n", phase.number, phase.title));
            if phase.commits.is_empty() {
                out.push_str("_No commits._\n");
                continue;
            }
            for commit in &phase.commits {
                let subject = commit.message.lines().next().unwrap_or("");
                out.push_str(&format!("pick {} {}\n", short_hash(&commit.hash), subject));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, FixedOffset};
    use proptest::prelude::*;

    use super::*;
    use crate::history::classifier::CommitClassifier;

    fn base_date() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00+00:00").unwrap()
    }

    fn commit(n: u32, message: &str, minutes: i64) -> Commit {
        let hash = format!("{:07x}{}", n, "0".repeat(33));
        Commit::new(hash, "dev", base_date() + Duration::minutes(minutes), message)
    }

    fn classify(mut commits: Vec<Commit>) -> Vec<Commit> {
        CommitClassifier::new(&["auth".to_string()])
            .unwrap()
            .classify_all(&mut commits);
        commits
    }

    #[test]
    fn test_phases_and_rendering() {
        let commits = classify(vec![
            commit(1, "docs: readme", 0),
            commit(2, "fix: off by one", 1),
            commit(3, "feat: export", 2),
            commit(4, "ci: cache deps", 3),
            commit(5, "feat!: new api", 4),
            commit(6, "feat: import", 5),
        ]);
        let plan = RebasePlanner::plan("feature", &commits);
        let order: Vec<&str> = plan.ordered().map(|c| c.message.as_str()).collect();
        assert_eq!(
            order,
            vec!["ci: cache deps", "feat!: new api", "feat: export", "feat: import", "fix: off by one", "docs: readme"]
        );

        let md = plan.render_markdown();
        for n in 1..=4 {
            assert!(md.contains(&format!("## Phase {}", n)));
        }
        assert!(md.contains("pick 0000004 ci: cache deps"));
        let p1 = md.find("## Phase 1").unwrap();
        let p2 = md.find("## Phase 2").unwrap();
        let ci = md.find("pick 0000004").unwrap();
        assert!(p1 < ci && ci < p2);
    }

    #[test]
    fn test_empty_phase_is_rendered() {
        let plan = RebasePlanner::plan("b", &classify(vec![commit(1, "fix: x", 0)]));
        let md = plan.render_markdown();
        assert_eq!(md.matches("_No commits._").count(), 3);
    }

    const MESSAGES: [&str; 8] = [
        "feat: a",
        "fix: b",
        "docs: c",
        "ci: d",
        "chore: e",
        "refactor!: f",
        "whatever",
        "Merge branch 'x'",
    ];

    proptest! {
        #[test]
        fn prop_phases_ordered_and_complete(
            specs in prop::collection::vec((0usize..MESSAGES.len(), 0i64..500), 0..40)
        ) {
            let commits = classify(
                specs
                    .iter()
                    .enumerate()
                    .map(|(i, (m, t))| commit(i as u32, MESSAGES[*m], *t))
                    .collect(),
            );
            let plan = RebasePlanner::plan("b", &commits);
            let ordered: Vec<&Commit> = plan.ordered().collect();
            prop_assert_eq!(ordered.len(), commits.len());

            for pair in ordered.windows(2) {
                let (a, b) = (phase_for(pair[0]), phase_for(pair[1]));
                prop_assert!(a <= b);
                if a == b {
                    prop_assert!(pair[0].date <= pair[1].date);
                }
            }

            let mut seen: Vec<&str> = ordered.iter().map(|c| c.hash.as_str()).collect();
            seen.sort();
            seen.dedup();
            prop_assert_eq!(seen.len(), commits.len());
        }
    }
}
