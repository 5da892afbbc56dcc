//! MergeGuard core library.
//!
//! This crate provides conflict detection between git refs, semantic and
//! risk analysis, resolution strategy generation, guarded plan execution,
//! post-resolution validation, commit-history analysis, and persistence of
//! scan results.

pub mod analysis;
pub mod config;
pub mod conflict;
pub mod db;
pub mod errors;
pub mod git;
pub mod history;
pub mod models;
pub mod resolution;
pub mod scan;
pub mod strategy;
pub mod validation;

// Re-exports for convenience.
pub use config::AppConfig;
pub use db::Database;
pub use errors::CoreError;
pub use resolution::{AutoResolver, ExecutionOutcome, ResolutionExecutor};
pub use scan::{ScanReport, ScanRequest, ScanService};
pub use strategy::StrategyGenerator;
pub use validation::ValidationSuite;
