//! Rule-based compliance checks for Python sources.
//!
//! Each rule family is a [`ComplianceChecker`]; the
//! [`ConstitutionalAnalyzer`] runs all of them and folds the violations
//! into a weighted score.

use std::path::Path;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::analysis::ast::{AstAnalyzer, CodeStructure};
use crate::models::RiskLevel;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Violation {
    pub rule: String,
    pub severity: RiskLevel,
    pub message: String,
    pub path: String,
    pub line: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComplianceReport {
    /// 1.0 = no violations.
    pub score: f64,
    pub violations: Vec<Violation>,
    pub files_checked: usize,
}

impl ComplianceReport {
    pub fn count(&self, severity: RiskLevel) -> usize {
        self.violations.iter().filter(|v| v.severity == severity).count()
    }
}

/// One family of compliance rules.
pub trait ComplianceChecker: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, path: &str, source: &str, structure: &CodeStructure) -> Vec<Violation>;
}

fn severity_penalty(level: RiskLevel) -> f64 {
    match level {
        RiskLevel::Critical => 0.25,
        RiskLevel::High => 0.15,
        RiskLevel::Medium => 0.08,
        RiskLevel::Low => 0.03,
        RiskLevel::VeryLow => 0.01,
    }
}

fn is_public(name: &str) -> bool {
    !name.starts_with('_')
}

fn violation(rule: &str, severity: RiskLevel, message: String, path: &str, line: Option<usize>) -> Violation {
    Violation {
        rule: rule.to_string(),
        severity,
        message,
        path: path.to_string(),
        line,
    }
}

/// Flags bare `except:` and silently swallowed exceptions.
#[derive(Debug)]
pub struct ErrorHandlingChecker {
    bare_except: Regex,
    swallow: Regex,
}

impl ErrorHandlingChecker {
    pub fn new() -> Result<Self, regex_lite::Error> {
        Ok(Self {
            bare_except: Regex::new(r"^\s*except\s*:")?,
            swallow: Regex::new(r"^\s*except(\s+[A-Za-z_][\w.]*)?(\s+as\s+\w+)?\s*:\s*pass\s*$")?,
        })
    }
}

impl ComplianceChecker for ErrorHandlingChecker {
    fn name(&self) -> &'static str {
        "error_handling"
    }

    fn check(&self, path: &str, source: &str, _structure: &CodeStructure) -> Vec<Violation> {
        let mut out = Vec::new();
        let lines: Vec<&str> = source.lines().collect();
        for (i, line) in lines.iter().enumerate() {
            if self.bare_except.is_match(line) {
                out.push(violation(
                    "bare_except",
                    RiskLevel::Medium,
                    "bare `except:` catches SystemExit and KeyboardInterrupt".into(),
                    path,
                    Some(i + 1),
                ));
            }
            let swallowed = self.swallow.is_match(line)
                || (line.trim_end().ends_with(':')
                    && line.trim_start().starts_with("except")
                    && lines.get(i + 1).map(|n| n.trim() == "pass").unwrap_or(false));
            if swallowed {
                out.push(violation(
                    "swallowed_exception",
                    RiskLevel::Low,
                    "exception is silently ignored".into(),
                    path,
                    Some(i + 1),
                ));
            }
        }
        out
    }
}

/// Public functions should be annotated.
#[derive(Debug, Default)]
pub struct TypeHintChecker;

impl ComplianceChecker for TypeHintChecker {
    fn name(&self) -> &'static str {
        "type_hints"
    }

    fn check(&self, path: &str, _source: &str, structure: &CodeStructure) -> Vec<Violation> {
        structure
            .functions
            .iter()
            .filter(|f| is_public(&f.name) && !f.has_type_hints)
            .map(|f| {
                violation(
                    "missing_type_hints",
                    RiskLevel::Low,
                    format!("public function '{}' has no type hints", f.name),
                    path,
                    Some(f.line),
                )
            })
            .collect()
    }
}

/// Public functions should be documented.
#[derive(Debug, Default)]
pub struct DocstringChecker;

impl ComplianceChecker for DocstringChecker {
    fn name(&self) -> &'static str {
        "docstrings"
    }

    fn check(&self, path: &str, _source: &str, structure: &CodeStructure) -> Vec<Violation> {
        structure
            .functions
            .iter()
            .filter(|f| is_public(&f.name) && !f.has_docstring)
            .map(|f| {
                violation(
                    "missing_docstring",
                    RiskLevel::VeryLow,
                    format!("public function '{}' has no docstring", f.name),
                    path,
                    Some(f.line),
                )
            })
            .collect()
    }
}

/// Dangerous calls and hard-coded credentials.
#[derive(Debug)]
pub struct SecurityChecker {
    rules: Vec<(&'static str, RiskLevel, Regex, &'static str)>,
    yaml_load: Regex,
}

impl SecurityChecker {
    pub fn new() -> Result<Self, regex_lite::Error> {
        Ok(Self {
            rules: vec![
                ("eval", RiskLevel::Critical, Regex::new(r"\beval\s*\(")?, "use of eval()"),
                ("exec", RiskLevel::Critical, Regex::new(r"\bexec\s*\(")?, "use of exec()"),
                (
                    "shell_true",
                    RiskLevel::High,
                    Regex::new(r"shell\s*=\s*True")?,
                    "subprocess call with shell=True",
                ),
                (
                    "pickle_loads",
                    RiskLevel::High,
                    Regex::new(r"\bpickle\.loads?\s*\(")?,
                    "unpickling untrusted data",
                ),
                (
                    "hardcoded_secret",
                    RiskLevel::Critical,
                    Regex::new(r#"(?i)\b(password|passwd|secret|api_key|apikey|token)\s*=\s*['"][^'"]{4,}['"]"#)?,
                    "hard-coded credential",
                ),
            ],
            yaml_load: Regex::new(r"\byaml\.load\s*\(")?,
        })
    }
}

impl ComplianceChecker for SecurityChecker {
    fn name(&self) -> &'static str {
        "security"
    }

    fn check(&self, path: &str, source: &str, _structure: &CodeStructure) -> Vec<Violation> {
        let mut out = Vec::new();
        for (i, line) in source.lines().enumerate() {
            let code = line.split('#').next().unwrap_or(line);
            for (rule, severity, pattern, message) in &self.rules {
                if pattern.is_match(code) {
                    out.push(violation(rule, *severity, (*message).to_string(), path, Some(i + 1)));
                }
            }
            if self.yaml_load.is_match(code) && !code.contains("Loader=") {
                out.push(violation(
                    "yaml_load",
                    RiskLevel::High,
                    "yaml.load without an explicit Loader".into(),
                    path,
                    Some(i + 1),
                ));
            }
        }
        out
    }
}

/// Runs every registered checker over Python sources.
pub struct ConstitutionalAnalyzer {
    ast: AstAnalyzer,
    checkers: Vec<Box<dyn ComplianceChecker>>,
}

impl std::fmt::Debug for ConstitutionalAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.checkers.iter().map(|c| c.name()).collect();
        f.debug_struct("ConstitutionalAnalyzer")
            .field("checkers", &names)
            .finish()
    }
}

impl ConstitutionalAnalyzer {
    /// Analyzer with no checkers registered.
    pub fn empty() -> Self {
        Self {
            ast: AstAnalyzer::new(),
            checkers: Vec::new(),
        }
    }

    /// Analyzer with the built-in rule families.
    pub fn with_default_checkers() -> Result<Self, regex_lite::Error> {
        Ok(Self::empty()
            .with_checker(Box::new(ErrorHandlingChecker::new()?))
            .with_checker(Box::new(TypeHintChecker))
            .with_checker(Box::new(DocstringChecker))
            .with_checker(Box::new(SecurityChecker::new()?)))
    }

    pub fn with_checker(mut self, checker: Box<dyn ComplianceChecker>) -> Self {
        self.checkers.push(checker);
        self
    }

    fn violations_for(&self, path: &str, source: &str) -> Vec<Violation> {
        let structure = self.ast.analyze_structure(source);
        self.checkers
            .iter()
            .flat_map(|c| c.check(path, source, &structure))
            .collect()
    }

    fn report(violations: Vec<Violation>, files_checked: usize) -> ComplianceReport {
        let penalty: f64 = violations.iter().map(|v| severity_penalty(v.severity)).sum();
        let score = (1.0 - penalty / files_checked.max(1) as f64).clamp(0.0, 1.0);
        ComplianceReport {
            score,
            violations,
            files_checked,
        }
    }

    pub fn check_source(&self, path: &str, source: &str) -> ComplianceReport {
        Self::report(self.violations_for(path, source), 1)
    }

    /// Check several `(path, source)` pairs together.
    pub fn check_sources<'a>(&self, sources: impl IntoIterator<Item = (&'a str, &'a str)>) -> ComplianceReport {
        let mut files = 0;
        let mut violations = Vec::new();
        for (path, source) in sources {
            files += 1;
            violations.extend(self.violations_for(path, source));
        }
        Self::report(violations, files)
    }

    /// Check every `.py` file below `root`, skipping hidden and virtualenv directories.
    pub fn check_directory(&self, root: &Path) -> ComplianceReport {
        let mut files = 0;
        let mut violations = Vec::new();
        for (rel, source) in python_sources(root) {
            files += 1;
            violations.extend(self.violations_for(&rel, &source));
        }
        debug!(root = %root.display(), files, violations = violations.len(), "compliance check complete");
        Self::report(violations, files)
    }
}

fn skip_dir(name: &str) -> bool {
    name.starts_with('.')
        || matches!(name, "venv" | "env" | "__pycache__" | "node_modules" | "site-packages" | "build" | "dist")
}

/// `(relative path, contents)` of every Python file below `root`.
pub fn python_sources(root: &Path) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let walker = WalkDir::new(root).sort_by_file_name().into_iter().filter_entry(|e| {
        e.depth() == 0
            || !e.file_type().is_dir()
            || !skip_dir(&e.file_name().to_string_lossy())
    });
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable path");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("py") {
            continue;
        }
        let rel = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        match std::fs::read_to_string(path) {
            Ok(source) => out.push((rel, source)),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> ConstitutionalAnalyzer {
        ConstitutionalAnalyzer::with_default_checkers().unwrap()
    }

    #[test]
    fn test_clean_source_scores_one() {
        let source = "def add(a: int, b: int) -> int:\n    \"\"\"Add.\"\"\"\n    return a + b\n";
        let report = analyzer().check_source("m.py", source);
        assert!(report.violations.is_empty(), "{:?}", report.violations);
        assert_eq!(report.score, 1.0);
    }

    #[test]
    fn test_security_patterns() {
        let source = "\
import subprocess, pickle, yaml
def run(cmd):
    subprocess.run(cmd, shell=True)
    data = pickle.loads(cmd)
    cfg = yaml.load(cmd)
    safe = yaml.load(cmd, Loader=yaml.SafeLoader)
    return eval(cmd)
PASSWORD = 'hunter22'
";
        let report = analyzer().check_source("m.py", source);
        let rules: Vec<&str> = report.violations.iter().map(|v| v.rule.as_str()).collect();
        for expected in ["shell_true", "pickle_loads", "yaml_load", "eval", "hardcoded_secret"] {
            assert!(rules.contains(&expected), "missing {}", expected);
        }
        assert_eq!(rules.iter().filter(|r| **r == "yaml_load").count(), 1);
        assert!(report.score < 0.5);
        assert!(report.count(RiskLevel::Critical) >= 2);
    }

    #[test]
    fn test_error_handling_rules() {
        let source = "\
def f() -> None:
    \"\"\"Doc.\"\"\"
    try:
        g()
    except:
        pass
";
        let report = analyzer().check_source("m.py", source);
        let rules: Vec<&str> = report.violations.iter().map(|v| v.rule.as_str()).collect();
        assert!(rules.contains(&"bare_except"));
        assert!(rules.contains(&"swallowed_exception"));
    }

    #[test]
    fn test_missing_hints_and_docstrings() {
        let report = analyzer().check_source("m.py", "def public(x):\n    return x\n\ndef _private(y):\n    return y\n");
        assert_eq!(report.violations.len(), 2);
        assert!(report.violations.iter().all(|v| v.line == Some(1)));
    }

    #[test]
    fn test_check_directory_skips_virtualenv() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
        std::fs::create_dir_all(dir.path().join("venv/lib")).unwrap();
        std::fs::write(dir.path().join("pkg/a.py"), "x = eval('1')\n").unwrap();
        std::fs::write(dir.path().join("venv/lib/b.py"), "y = eval('2')\n").unwrap();
        let report = analyzer().check_directory(dir.path());
        assert_eq!(report.files_checked, 1);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].path, "pkg/a.py");
    }

    #[test]
    fn test_empty_analyzer() {
        let report = ConstitutionalAnalyzer::empty().check_source("m.py", "eval('x')\n");
        assert!(report.violations.is_empty());
    }
}
