//! Conflict analysis: structure, scoring, semantic findings, compliance,
//! dependencies and aggregate risk.

pub mod ast;
pub mod conflict_analyzer;
pub mod constitutional;
pub mod dependency;
pub mod risk;
pub mod semantic;

pub use ast::{AstAnalyzer, CodeStructure};
pub use conflict_analyzer::ConflictAnalyzer;
pub use constitutional::{ComplianceChecker, ComplianceReport, ConstitutionalAnalyzer};
pub use dependency::{DependencyAnalyzer, DependencyGraph};
pub use risk::{RiskAssessor, RiskReport};
pub use semantic::{calculate_semantic_risk, SemanticAnalyzer};
