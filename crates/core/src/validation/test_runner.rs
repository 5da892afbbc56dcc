//! Runs the project's test command as the last validation gate.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ValidationConfig;
use crate::models::ValidationResult;

const OUTPUT_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct TestRunner {
    command: Vec<String>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl TestRunner {
    pub fn from_config(config: &ValidationConfig, cancel: CancellationToken) -> Self {
        Self {
            command: config.test_command.clone(),
            timeout: Duration::from_secs(config.test_timeout_secs),
            cancel,
        }
    }

    pub async fn run(&self, root: &Path) -> ValidationResult {
        let Some((program, args)) = self.command.split_first() else {
            return ValidationResult::passed("tests", "skipped: no test command configured", 1.0);
        };
        let shown = self.command.join(" ");
        info!(command = %shown, "running tests");

        let mut cmd = Command::new(program);
        cmd.current_dir(root)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        // Dropping the output future on timeout or cancellation kills the child.
        let res = tokio::select! {
            res = tokio::time::timeout(self.timeout, cmd.output()) => res,
            _ = self.cancel.cancelled() => {
                return ValidationResult::error("tests", format!("{}: cancelled", shown));
            }
        };

        match res {
            Err(_) => {
                warn!(command = %shown, timeout_secs = self.timeout.as_secs(), "tests timed out");
                ValidationResult::error(
                    "tests",
                    format!("{}: timed out after {}s", shown, self.timeout.as_secs()),
                )
            }
            Ok(Err(e)) => ValidationResult::error("tests", format!("{}: {}", shown, e)),
            Ok(Ok(output)) if output.status.success() => {
                ValidationResult::passed("tests", format!("{}: passed", shown), 1.0)
            }
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).to_string();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                ValidationResult::failed(
                    "tests",
                    format!(
                        "{}: exit {}\n{}",
                        shown,
                        output.status.code().unwrap_or(-1),
                        tail(&text, OUTPUT_TAIL_LINES)
                    ),
                    0.0,
                )
            }
        }
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ValidationStatus;

    fn runner(cmd: &[&str], timeout_secs: u64) -> TestRunner {
        let config = ValidationConfig {
            test_command: cmd.iter().map(|s| s.to_string()).collect(),
            test_timeout_secs: timeout_secs,
            ..ValidationConfig::default()
        };
        TestRunner::from_config(&config, CancellationToken::new())
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
    }

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner(&["definitely-not-a-real-test-binary"], 5).run(dir.path()).await;
        assert_eq!(result.status, ValidationStatus::Error);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let ok = runner(&["sh", "-c", "exit 0"], 5).run(dir.path()).await;
        assert!(ok.is_passed());
        let bad = runner(&["sh", "-c", "echo broken; exit 3"], 5).run(dir.path()).await;
        assert_eq!(bad.status, ValidationStatus::Failed);
        assert!(bad.details.contains("exit 3"));
        assert!(bad.details.contains("broken"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner(&["sh", "-c", "sleep 5"], 0).run(dir.path()).await;
        assert_eq!(result.status, ValidationStatus::Error);
        assert!(result.details.contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_run_names_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let config = ValidationConfig {
            test_command: vec!["sh".into(), "-c".into(), "sleep 5".into()],
            test_timeout_secs: 30,
            ..ValidationConfig::default()
        };
        let runner = TestRunner::from_config(&config, cancel.clone());
        cancel.cancel();
        let result = runner.run(dir.path()).await;
        assert_eq!(result.status, ValidationStatus::Error);
        assert_eq!(result.details, "sh -c sleep 5: cancelled");
    }
}
