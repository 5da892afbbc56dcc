//! Shared styling utilities for terminal output.

use std::time::Duration;

use comfy_table::{Cell, Color};
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use mergeguard_core::models::{RiskLevel, ValidationResult, ValidationStatus};

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Risk level colored by severity.
pub fn risk(level: RiskLevel) -> String {
    let style = match level {
        RiskLevel::Critical => Style::new().red().bold(),
        RiskLevel::High => Style::new().red(),
        RiskLevel::Medium => Style::new().yellow(),
        RiskLevel::Low => Style::new().green(),
        RiskLevel::VeryLow => Style::new().dim(),
    };
    style.apply_to(level.as_str()).to_string()
}

/// Table cell for a risk level.
pub fn risk_cell(level: RiskLevel) -> Cell {
    let color = match level {
        RiskLevel::Critical | RiskLevel::High => Color::Red,
        RiskLevel::Medium => Color::Yellow,
        RiskLevel::Low => Color::Green,
        RiskLevel::VeryLow => Color::DarkGrey,
    };
    Cell::new(level.as_str()).fg(color)
}

/// One validation result as a status line.
pub fn validation_line(result: &ValidationResult) -> String {
    let text = format!("[{}] {}", result.component, result.details);
    match result.status {
        ValidationStatus::Passed => success(&text),
        ValidationStatus::Failed => error(&text),
        ValidationStatus::Error => warn(&text),
    }
}

/// Steady-ticking spinner with a message.
pub fn spinner(msg: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
        spinner.set_style(template.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    spinner.set_message(msg.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
