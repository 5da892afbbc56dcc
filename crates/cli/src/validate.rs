//! `mergeguard validate`: run the validation suite over resolved files.

use std::path::Path;

use anyhow::{Context as _, Result};

use mergeguard_core::validation::{all_passed, TestRunner, ValidationSuite};

use crate::{style, Context};

pub async fn run(ctx: &Context, repo_path: &Path, files: Vec<String>) -> Result<()> {
    let repo = ctx.open_repo(repo_path).await?;
    let files = if files.is_empty() {
        repo.diff_names().await.context("failed to list changed files")?
    } else {
        files
    };
    if files.is_empty() {
        println!("{}", style::warn("No changed files to validate."));
    }

    let tests = TestRunner::from_config(&ctx.config.validation, ctx.cancel.clone());
    let suite = ValidationSuite::new(&ctx.config.validation, tests)?;
    let spinner = style::spinner(format!("Validating {} file(s)...", files.len()));
    let results = suite.validate(repo.root(), &files).await;
    spinner.finish_and_clear();

    for result in &results {
        println!("{}", style::validation_line(result));
    }
    println!();
    if all_passed(&results) {
        println!("{}", style::success("All checks passed"));
        Ok(())
    } else {
        let failed = results.iter().filter(|r| !r.is_passed()).count();
        anyhow::bail!("{} of {} check(s) did not pass", failed, results.len())
    }
}
