//! `mergeguard analyze`: scan branch pairs and store the results.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use mergeguard_core::db::Database;
use mergeguard_core::scan::{ScanReport, ScanRequest, ScanService};

use crate::{style, truncate, Context};

pub struct AnalyzeArgs {
    pub repo: PathBuf,
    pub pr_id: Option<u64>,
    pub base: Option<String>,
    pub heads: Vec<String>,
    pub json: bool,
}

pub async fn run(ctx: &Context, args: AnalyzeArgs) -> Result<()> {
    let repo = ctx.open_repo(&args.repo).await?;
    let db = ctx.open_database(&repo).await?;
    let target = args
        .base
        .clone()
        .unwrap_or_else(|| ctx.config.git.default_base.clone());

    let requests: Vec<ScanRequest> = if let Some(pr_id) = args.pr_id {
        vec![ScanRequest {
            repo_path: repo.root().to_path_buf(),
            source: format!("pull/{}", pr_id),
            target: target.clone(),
            pr_id: Some(pr_id),
        }]
    } else if args.heads.is_empty() {
        let current = repo
            .current_branch()
            .await
            .context("failed to determine the current branch; pass --head")?;
        vec![ScanRequest::branches(repo.root(), &current, &target)]
    } else {
        args.heads
            .iter()
            .map(|head| ScanRequest::branches(repo.root(), head, &target))
            .collect()
    };

    let service = ScanService::new(ctx.config.clone(), ctx.generator(), ctx.cancel.clone());
    let spinner = (!args.json).then(|| style::spinner(format!("Scanning {} branch pair(s)...", requests.len())));
    let labels: Vec<String> = requests.iter().map(|r| format!("{} -> {}", r.source, r.target)).collect();
    let results = service.scan_many(requests).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let repo_root = repo.root().display().to_string();
    let mut reports = Vec::new();
    let mut failures = 0;
    for (label, result) in labels.iter().zip(results) {
        match result {
            Ok(report) => {
                persist(&db, &repo_root, &report);
                reports.push(report);
            }
            Err(e) => {
                failures += 1;
                let _ = db.insert_audit_log("analyze", Some(label), Some(&e.to_string()), false);
                eprintln!("{}", style::error(&format!("{}: {}", label, e)));
            }
        }
    }

    if args.json {
        let out = serde_json::to_string_pretty(&reports).context("failed to serialize report")?;
        println!("{}", out);
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} scan(s) failed", failures, labels.len());
    }
    Ok(())
}

/// Storage failures are reported but do not discard the scan output.
fn persist(db: &Database, repo_root: &str, report: &ScanReport) {
    let subject = format!("{} -> {}", report.source, report.target);
    match db.save_scan(repo_root, report) {
        Ok(_) => {
            let details = format!(
                "{} conflicts, overall risk {}",
                report.conflicts.len(),
                report.risk.overall_risk
            );
            let _ = db.insert_audit_log("analyze", Some(&subject), Some(&details), true);
        }
        Err(e) => eprintln!("{}", style::warn(&format!("failed to store scan {}: {}", subject, e))),
    }
}

fn print_report(report: &ScanReport) {
    println!();
    println!(
        "{}",
        style::header(&format!("{} -> {}", report.source, report.target))
    );

    if report.conflicts.is_empty() {
        println!("{}", style::success("No conflicts: the branches merge cleanly"));
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "ID", "File", "Type", "Risk", "Blocks", "Alignment", "Auto", "Strategies",
    ]);
    for entry in &report.conflicts {
        let c = &entry.conflict;
        let a = &entry.analysis;
        let strategies: Vec<String> = entry
            .strategies
            .iter()
            .map(|s| {
                let suffix = s.id.rsplit('-').next().unwrap_or(&s.id);
                let approval = if s.requires_approval { "*" } else { "" };
                format!("{} {}{}", suffix, s.strategy_type, approval)
            })
            .collect();
        table.add_row(vec![
            Cell::new(c.short_id()),
            Cell::new(c.primary_path()),
            Cell::new(c.conflict_type),
            style::risk_cell(a.risk_level),
            Cell::new(c.blocks().len()),
            Cell::new(format!("{:.2}", a.alignment_score)),
            Cell::new(if a.is_auto_resolvable { "yes" } else { "no" }),
            Cell::new(strategies.join("\n")),
        ]);
    }
    println!("{}", table);
    println!("{}", style::dim("* requires approval"));

    for entry in &report.conflicts {
        for finding in &entry.analysis.semantic_findings {
            println!(
                "  {} {}: {}",
                style::risk(finding.severity),
                entry.conflict.primary_path(),
                truncate(&finding.description, 100)
            );
        }
    }

    let risk = &report.risk;
    println!();
    println!(
        "Overall risk: {} (score {:.2}, {} conflicts)",
        style::risk(risk.overall_risk),
        risk.risk_score,
        risk.total_conflicts
    );
    if !risk.critical_files.is_empty() {
        println!("Critical files: {}", risk.critical_files.join(", "));
    }
    for cycle in &report.dependency_cycles {
        println!("{}", style::warn(&format!("Import cycle: {}", cycle.modules.join(" -> "))));
    }
    for item in &risk.mitigation_strategies {
        println!("  - {}", item);
    }
    for item in &risk.recommendations {
        println!("  > {}", item);
    }
    println!();
    println!(
        "{}",
        style::dim("Apply a strategy with: mergeguard resolve <conflict-id> <strategy>")
    );
}
