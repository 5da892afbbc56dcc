//! Commit history analysis and rebase planning.

pub mod classifier;
pub mod rebase;

pub use classifier::{render_history_report, summarize, CommitClassifier, HistorySummary};
pub use rebase::{RebasePlan, RebasePlanner};
