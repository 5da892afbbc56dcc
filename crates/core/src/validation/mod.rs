//! Post-resolution validation gate.

pub mod quality;
pub mod test_runner;

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::analysis::ast::{brackets_balanced, AstAnalyzer, SourceLanguage};
use crate::config::ValidationConfig;
use crate::conflict::markers::marker_lines;
use crate::errors::ValidationError;
use crate::models::ValidationResult;

pub use quality::QualityChecker;
pub use test_runner::TestRunner;

/// Structural checks on resolved files.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator {
    ast: AstAnalyzer,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            ast: AstAnalyzer::new(),
        }
    }

    /// `markers` and `syntax` results for one file's content.
    pub fn validate_content(&self, path: &str, content: &str) -> Vec<ValidationResult> {
        let mut results = Vec::with_capacity(2);

        let markers = marker_lines(content);
        if markers.is_empty() {
            results.push(ValidationResult::passed("markers", format!("{}: no conflict markers", path), 1.0));
        } else {
            let lines: Vec<String> = markers.iter().map(|l| l.to_string()).collect();
            results.push(ValidationResult::failed(
                "markers",
                format!("{}: conflict markers on lines {}", path, lines.join(", ")),
                0.0,
            ));
        }

        let syntax_ok = match SourceLanguage::for_path(path) {
            SourceLanguage::Python => self.ast.is_valid_python(content),
            SourceLanguage::Other => brackets_balanced(content),
        };
        if syntax_ok {
            results.push(ValidationResult::passed("syntax", format!("{}: parses", path), 1.0));
        } else {
            results.push(ValidationResult::failed("syntax", format!("{}: syntax errors", path), 0.0));
        }
        results
    }

    pub fn validate_file(&self, root: &Path, rel: &str) -> Vec<ValidationResult> {
        match fs::read(root.join(rel)) {
            Ok(bytes) if bytes.contains(&0) => {
                vec![ValidationResult::passed("markers", format!("{}: binary file", rel), 1.0)]
            }
            Ok(bytes) => self.validate_content(rel, &String::from_utf8_lossy(&bytes)),
            Err(e) => vec![ValidationResult::error("syntax", format!("{}: {}", rel, e))],
        }
    }
}

/// Runs every validator over a set of resolved files.
pub struct ValidationSuite {
    validator: Validator,
    quality: QualityChecker,
    tests: TestRunner,
}

impl ValidationSuite {
    pub fn new(config: &ValidationConfig, tests: TestRunner) -> Result<Self, ValidationError> {
        Ok(Self {
            validator: Validator::new(),
            quality: QualityChecker::new(config.min_quality_score)?,
            tests,
        })
    }

    pub async fn validate(&self, root: &Path, files: &[String]) -> Vec<ValidationResult> {
        let mut results = Vec::new();
        for file in files {
            results.extend(self.validator.validate_file(root, file));
        }
        results.push(self.quality.check_files(root, files));
        results.push(self.tests.run(root).await);

        let failed = results.iter().filter(|r| !r.is_passed()).count();
        info!(files = files.len(), checks = results.len(), failed, "validation finished");
        debug!(?results, "validation results");
        results
    }
}

/// True when every result passed.
pub fn all_passed(results: &[ValidationResult]) -> bool {
    results.iter().all(ValidationResult::is_passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::markers::wrap_conflict;
    use crate::models::ValidationStatus;

    #[test]
    fn test_clean_python_passes() {
        let results = Validator::new().validate_content("a.py", "def f(x):\n    return x\n");
        assert!(all_passed(&results));
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_markers_and_syntax_fail() {
        let content = wrap_conflict("x = 1\n", "x = 2\n");
        let results = Validator::new().validate_content("a.py", &content);
        assert_eq!(results[0].status, ValidationStatus::Failed);
        assert!(results[0].details.contains("lines 1, 5"));
        assert_eq!(results[1].status, ValidationStatus::Failed);
    }

    #[test]
    fn test_non_python_uses_brackets() {
        let v = Validator::new();
        assert!(all_passed(&v.validate_content("a.json", "{\"a\": [1, 2]}\n")));
        assert!(!all_passed(&v.validate_content("a.json", "{\"a\": [1, 2}\n")));
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let results = Validator::new().validate_file(dir.path(), "gone.py");
        assert_eq!(results[0].status, ValidationStatus::Error);
    }

    #[tokio::test]
    async fn test_suite_without_test_command() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.py"), "def f() -> int:\n    \"\"\"Doc.\"\"\"\n    return 1\n").unwrap();
        let config = ValidationConfig::default();
        let suite = ValidationSuite::new(&config, TestRunner::from_config(&config, Default::default())).unwrap();
        let results = suite.validate(dir.path(), &["ok.py".to_string()]).await;
        assert_eq!(results.len(), 4);
        assert!(all_passed(&results), "{:?}", results);
    }
}
