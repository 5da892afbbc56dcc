//! Compliance-score gate over resolved files.

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::analysis::ast::SourceLanguage;
use crate::analysis::constitutional::ConstitutionalAnalyzer;
use crate::errors::ValidationError;
use crate::models::ValidationResult;

pub struct QualityChecker {
    analyzer: ConstitutionalAnalyzer,
    min_score: f64,
}

impl QualityChecker {
    pub fn new(min_score: f64) -> Result<Self, ValidationError> {
        Ok(Self::with_analyzer(ConstitutionalAnalyzer::with_default_checkers()?, min_score))
    }

    pub fn with_analyzer(analyzer: ConstitutionalAnalyzer, min_score: f64) -> Self {
        Self { analyzer, min_score }
    }

    /// Score the Python files among `files` (relative to `root`).
    pub fn check_files(&self, root: &Path, files: &[String]) -> ValidationResult {
        let mut sources = Vec::new();
        for rel in files {
            if SourceLanguage::for_path(rel) != SourceLanguage::Python {
                continue;
            }
            match fs::read_to_string(root.join(rel)) {
                Ok(source) => sources.push((rel.clone(), source)),
                Err(e) => warn!(path = %rel, error = %e, "skipping unreadable file"),
            }
        }
        if sources.is_empty() {
            return ValidationResult::passed("quality", "no Python files to check", 1.0);
        }
        self.check_sources(&sources)
    }

    pub fn check_sources(&self, sources: &[(String, String)]) -> ValidationResult {
        let report = self
            .analyzer
            .check_sources(sources.iter().map(|(p, s)| (p.as_str(), s.as_str())));
        let details = format!(
            "compliance {:.2} over {} file(s), {} violation(s)",
            report.score,
            report.files_checked,
            report.violations.len()
        );
        if report.score >= self.min_score {
            ValidationResult::passed("quality", details, report.score)
        } else {
            ValidationResult::failed("quality", details, report.score)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insecure_code_fails_threshold() {
        let checker = QualityChecker::new(0.9).unwrap();
        let source = "import pickle\n\ndef load(blob):\n    try:\n        return eval(blob)\n    except:\n        pass\n";
        let result = checker.check_sources(&[("bad.py".into(), source.into())]);
        assert!(!result.is_passed());
        assert!(result.score < 0.9);
    }

    #[test]
    fn test_non_python_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let checker = QualityChecker::new(0.5).unwrap();
        let result = checker.check_files(dir.path(), &["README.md".into()]);
        assert!(result.is_passed());
        assert_eq!(result.score, 1.0);
    }
}
