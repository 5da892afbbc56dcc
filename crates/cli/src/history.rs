//! `mergeguard analyze-history` and `mergeguard plan-rebase`.

use std::path::Path;

use anyhow::{Context as _, Result};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use mergeguard_core::history::{render_history_report, summarize, CommitClassifier, RebasePlanner};
use mergeguard_core::models::Commit;

use crate::{style, Context};

/// Classified commits on `branch` that are not on `base`.
async fn classified_commits(
    ctx: &Context,
    repo_path: &Path,
    branch: &str,
    base: Option<&str>,
) -> Result<Vec<Commit>> {
    let repo = ctx.open_repo(repo_path).await?;
    let base = base.unwrap_or(&ctx.config.git.default_base);
    let range = if base == branch {
        branch.to_string()
    } else {
        format!("{}..{}", base, branch)
    };
    let mut commits = repo
        .log(&range, None)
        .await
        .with_context(|| format!("failed to read history of {}", range))?;
    let classifier = CommitClassifier::new(&ctx.config.analysis.critical_keywords)
        .context("failed to build commit classifier")?;
    classifier.classify_all(&mut commits);
    Ok(commits)
}

pub async fn run_analyze(
    ctx: &Context,
    repo_path: &Path,
    branch: &str,
    base: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let commits = classified_commits(ctx, repo_path, branch, base).await?;
    let summary = summarize(&commits);
    let report = render_history_report(branch, &summary, &commits);

    match output {
        Some(path) => {
            std::fs::write(path, &report)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("{}", style::success(&format!("History report written to {}", path.display())));
        }
        None => println!("{}", report),
    }
    Ok(())
}

pub async fn run_plan(
    ctx: &Context,
    repo_path: &Path,
    branch: &str,
    base: Option<&str>,
    output: &Path,
) -> Result<()> {
    let commits = classified_commits(ctx, repo_path, branch, base).await?;
    let plan = RebasePlanner::plan(branch, &commits);
    std::fs::write(output, plan.render_markdown())
        .with_context(|| format!("failed to write {}", output.display()))?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Phase", "Title", "Commits"]);
    for phase in &plan.phases {
        table.add_row(vec![
            Cell::new(phase.number),
            Cell::new(&phase.title),
            Cell::new(phase.commits.len()),
        ]);
    }
    println!("{}", table);
    println!(
        "{}",
        style::success(&format!(
            "Rebase plan for {} ({} commits) written to {}",
            branch,
            plan.commit_count(),
            output.display()
        ))
    );
    Ok(())
}
