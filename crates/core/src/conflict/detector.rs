//! Conflict detection between two refs.
//!
//! Detection never touches the working tree: on git 2.38+ it asks
//! `merge-tree --write-tree` for the merged tree and reads conflicted blobs
//! from it; older git falls back to the three-argument `merge-tree` and a
//! local three-way merge of each reported file.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::config::AnalysisConfig;
use crate::conflict::markers::parse_conflict_blocks;
use crate::errors::{ConflictError, GitError};
use crate::git::repository::RepositoryOperations;
use crate::models::{Conflict, ConflictBlock, ConflictTypeExtended, RiskLevel};

/// Anything that can list the conflicts of merging `source` into `target`.
#[async_trait]
pub trait ConflictDetection: Send + Sync {
    async fn detect(
        &self,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<Vec<Conflict>, ConflictError>;
}

/// Resolved refs shared by every per-file task of one detection run.
#[derive(Debug, Clone)]
struct MergeContext {
    source_ref: String,
    target_ref: String,
    source_sha: String,
    target_sha: String,
    base_sha: Option<String>,
    /// Merged tree from `merge-tree --write-tree`; `None` on the legacy path.
    tree: Option<String>,
}

/// A conflicted path plus git's hint about the kind of conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictedPath {
    pub path: String,
    pub kind_hint: Option<String>,
}

/// Git-backed implementation of [`ConflictDetection`].
#[derive(Debug, Clone)]
pub struct GitConflictDetector {
    repo: RepositoryOperations,
    analysis: AnalysisConfig,
    max_concurrent_files: usize,
}

impl GitConflictDetector {
    pub fn new(repo: RepositoryOperations, analysis: AnalysisConfig, max_concurrent_files: usize) -> Self {
        Self {
            repo,
            analysis,
            max_concurrent_files: max_concurrent_files.max(1),
        }
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.analysis
            .ignore_patterns
            .iter()
            .any(|pattern| glob_match::glob_match(pattern, path))
    }

    async fn resolve(&self, reference: &str) -> Result<String, ConflictError> {
        match self.repo.resolve_ref(reference).await {
            Ok(sha) => Ok(sha),
            Err(GitError::RefNotFound(r)) => {
                Err(ConflictError::DetectionFailed(format!("unknown ref '{}'", r)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Analyse one path, degrading to a generic merge conflict on failure.
    async fn analyze_or_degrade(&self, ctx: &MergeContext, entry: ConflictedPath) -> Option<Conflict> {
        match self.analyze_file(ctx, &entry).await {
            Ok(conflict) => conflict,
            Err(e) => {
                warn!(path = %entry.path, error = %e, "file analysis failed, recording generic conflict");
                Some(
                    Conflict::new(
                        &ctx.source_ref,
                        &ctx.target_ref,
                        &entry.path,
                        ConflictTypeExtended::Merge,
                        Vec::new(),
                    )
                    .with_risk(RiskLevel::Medium)
                    .with_estimate(15)
                    .with_description(format!("{}: could not be analysed ({})", entry.path, e)),
                )
            }
        }
    }

    async fn analyze_file(
        &self,
        ctx: &MergeContext,
        entry: &ConflictedPath,
    ) -> Result<Option<Conflict>, ConflictError> {
        let path = entry.path.as_str();
        let base = match &ctx.base_sha {
            Some(b) => self.repo.show_file(b, path).await?,
            None => None,
        };
        let current = self.repo.show_file(&ctx.target_sha, path).await?;
        let incoming = self.repo.show_file(&ctx.source_sha, path).await?;

        let is_binary = [&base, &current, &incoming]
            .iter()
            .any(|side| side.as_deref().map(looks_binary).unwrap_or(false));
        let one_side_missing = current.is_none() != incoming.is_none();

        let blocks = if is_binary || one_side_missing {
            Vec::new()
        } else {
            let merged = match &ctx.tree {
                Some(tree) => self
                    .repo
                    .show_file(tree, path)
                    .await?
                    .map(|bytes| String::from_utf8_lossy(&bytes).to_string()),
                None => {
                    let text = |b: &Option<Vec<u8>>| {
                        b.as_deref()
                            .map(|bytes| String::from_utf8_lossy(bytes).to_string())
                            .unwrap_or_default()
                    };
                    match synthesize_merge(&text(&base), &text(&current), &text(&incoming)) {
                        Some(merged) => Some(merged),
                        None => {
                            debug!(path, "legacy merge is clean, not a conflict");
                            return Ok(None);
                        }
                    }
                }
            };
            merged
                .map(|m| parse_conflict_blocks(path, &m))
                .unwrap_or_default()
        };

        let conflict_type = classify_conflict(path, entry.kind_hint.as_deref(), &blocks, is_binary, one_side_missing);
        let risk = assess_risk(conflict_type, &blocks, path, &self.analysis.critical_keywords);
        let minutes = estimate_minutes(conflict_type, &blocks, risk);
        let description = describe(path, conflict_type, &blocks);

        debug!(path, conflict_type = %conflict_type, risk = %risk, blocks = blocks.len(), "conflict classified");
        Ok(Some(
            Conflict::new(&ctx.source_ref, &ctx.target_ref, path, conflict_type, blocks)
                .with_risk(risk)
                .with_estimate(minutes)
                .with_description(description),
        ))
    }

    async fn conflicted_paths(&self, ctx: &mut MergeContext) -> Result<Vec<ConflictedPath>, ConflictError> {
        let modern = self.repo.supports_write_tree().await?;
        if modern {
            let out = self
                .repo
                .merge_tree_write_tree(&ctx.target_sha, &ctx.source_sha)
                .await
                .map_err(|e| match e {
                    GitError::CommandFailed { stderr, .. } => ConflictError::MergeTree(stderr),
                    GitError::UnexpectedOutput { detail, .. } => ConflictError::MergeTree(detail),
                    other => ConflictError::Git(other),
                })?;
            ctx.tree = Some(out.tree.clone());
            let hints = kind_hints(&out.messages, &out.conflicted_paths);
            Ok(out
                .conflicted_paths
                .into_iter()
                .map(|path| {
                    let kind_hint = hints.get(&path).cloned();
                    ConflictedPath { path, kind_hint }
                })
                .collect())
        } else {
            let base = ctx.base_sha.clone().ok_or_else(|| {
                ConflictError::DetectionFailed(format!(
                    "'{}' and '{}' have no common ancestor",
                    ctx.source_ref, ctx.target_ref
                ))
            })?;
            info!("git < 2.38, using legacy merge-tree");
            let out = self
                .repo
                .merge_tree_legacy(&base, &ctx.target_sha, &ctx.source_sha)
                .await
                .map_err(|e| ConflictError::MergeTree(e.to_string()))?;
            Ok(parse_legacy_merge_tree(&out))
        }
    }
}

#[async_trait]
impl ConflictDetection for GitConflictDetector {
    #[instrument(skip(self), fields(root = %self.repo.root().display()))]
    async fn detect(
        &self,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<Vec<Conflict>, ConflictError> {
        info!(source = source_branch, target = target_branch, "detecting conflicts");

        let source_sha = self.resolve(source_branch).await?;
        let target_sha = self.resolve(target_branch).await?;
        let base_sha = self.repo.merge_base(&target_sha, &source_sha).await?;

        let mut ctx = MergeContext {
            source_ref: source_branch.to_string(),
            target_ref: target_branch.to_string(),
            source_sha,
            target_sha,
            base_sha,
            tree: None,
        };

        let paths: Vec<ConflictedPath> = self
            .conflicted_paths(&mut ctx)
            .await?
            .into_iter()
            .filter(|entry| {
                let ignored = self.is_ignored(&entry.path);
                if ignored {
                    debug!(path = %entry.path, "path ignored by configuration");
                }
                !ignored
            })
            .collect();

        let ctx = &ctx;
        let conflicts: Vec<Conflict> = stream::iter(paths)
            .map(|entry| self.analyze_or_degrade(ctx, entry))
            .buffered(self.max_concurrent_files)
            .filter_map(|c| async move { c })
            .collect()
            .await;

        info!(count = conflicts.len(), "conflict detection complete");
        Ok(conflicts)
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Map each conflicted path to the kind in its `CONFLICT (<kind>): ...` message.
fn kind_hints(messages: &[String], paths: &[String]) -> HashMap<String, String> {
    let mut hints = HashMap::new();
    for message in messages {
        let Some(rest) = message.strip_prefix("CONFLICT (") else {
            continue;
        };
        let Some((kind, detail)) = rest.split_once("):") else {
            continue;
        };
        for path in paths {
            if detail.contains(path.as_str()) && !hints.contains_key(path) {
                hints.insert(path.clone(), kind.trim().to_string());
            }
        }
    }
    hints
}

/// Parse the section headers of legacy `git merge-tree <base> <a> <b>`.
pub fn parse_legacy_merge_tree(output: &str) -> Vec<ConflictedPath> {
    #[derive(Default)]
    struct Section {
        header: String,
        base: Option<(String, String)>,
        our: Option<(String, String)>,
        their: Option<(String, String)>,
    }

    fn finish(section: Section, out: &mut Vec<ConflictedPath>) {
        let path = section
            .our
            .as_ref()
            .or(section.their.as_ref())
            .or(section.base.as_ref())
            .map(|(_, p)| p.clone());
        let Some(path) = path else {
            return;
        };
        let sha = |e: &Option<(String, String)>| e.as_ref().map(|(s, _)| s.clone());
        let kind = match section.header.as_str() {
            "changed in both" => Some("content"),
            "added in both" if sha(&section.our) != sha(&section.their) => Some("add/add"),
            h if h.starts_with("removed in") => {
                let survivor = sha(&section.our).or_else(|| sha(&section.their));
                match survivor {
                    Some(s) if Some(&s) != sha(&section.base).as_ref() => Some("modify/delete"),
                    _ => None,
                }
            }
            _ => None,
        };
        if let Some(kind) = kind {
            if !out.iter().any(|c| c.path == path) {
                out.push(ConflictedPath {
                    path,
                    kind_hint: Some(kind.to_string()),
                });
            }
        }
    }

    let mut out = Vec::new();
    let mut section: Option<Section> = None;
    for line in output.lines() {
        if !line.starts_with(' ') && !line.starts_with('@') && !line.starts_with('+') && !line.starts_with('-') {
            let header = line.trim();
            if header == "changed in both"
                || header == "added in both"
                || header.starts_with("removed in ")
                || header.starts_with("added in ")
            {
                if let Some(done) = section.take() {
                    finish(done, &mut out);
                }
                section = Some(Section {
                    header: header.to_string(),
                    ..Section::default()
                });
                continue;
            }
        }
        let Some(current) = section.as_mut() else {
            continue;
        };
        if let Some(entry) = line.strip_prefix("  ") {
            let entry = entry.trim_start();
            let Some((role, rest)) = entry.split_once(char::is_whitespace) else {
                continue;
            };
            let rest = rest.trim_start();
            let Some((_mode, rest)) = rest.split_once(' ') else {
                continue;
            };
            let Some((sha, path)) = rest.trim_start().split_once(' ') else {
                continue;
            };
            let value = Some((sha.to_string(), path.trim().to_string()));
            match role {
                "base" => current.base = value,
                "our" => current.our = value,
                "their" => current.their = value,
                _ => {}
            }
        }
    }
    if let Some(done) = section {
        finish(done, &mut out);
    }
    out
}

/// Three-way merge with diff3 markers; `None` when the merge is clean.
fn synthesize_merge(base: &str, current: &str, incoming: &str) -> Option<String> {
    let mut options = diffy::MergeOptions::new();
    options.set_conflict_style(diffy::ConflictStyle::Diff3);
    match options.merge(base, current, incoming) {
        Ok(_) => None,
        Err(with_markers) => Some(with_markers),
    }
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8000).any(|b| *b == 0)
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

const DEPENDENCY_MANIFESTS: &[&str] = &[
    "requirements.txt",
    "requirements-dev.txt",
    "pipfile",
    "pipfile.lock",
    "pyproject.toml",
    "setup.py",
    "setup.cfg",
    "poetry.lock",
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "cargo.toml",
    "cargo.lock",
    "go.mod",
    "go.sum",
    "gemfile",
    "gemfile.lock",
];

const CONFIG_EXTENSIONS: &[&str] = &["ini", "cfg", "conf", "yaml", "yml", "toml", "json", "env", "properties"];

fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_ascii_lowercase()
}

pub fn is_dependency_manifest(path: &str) -> bool {
    let name = file_name(path);
    DEPENDENCY_MANIFESTS.contains(&name.as_str())
        || (name.starts_with("requirements") && name.ends_with(".txt"))
}

pub fn is_config_file(path: &str) -> bool {
    let name = file_name(path);
    if name == ".env" || name.starts_with(".env.") {
        return true;
    }
    name.rsplit_once('.')
        .map(|(_, ext)| CONFIG_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

fn definition_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|l| {
            l.starts_with("def ")
                || l.starts_with("async def ")
                || l.starts_with("class ")
                || l.starts_with("import ")
                || l.starts_with("from ")
        })
        .collect()
}

fn changes_definitions(block: &ConflictBlock) -> bool {
    definition_lines(&block.current_content) != definition_lines(&block.incoming_content)
}

fn changes_classes(block: &ConflictBlock) -> bool {
    let classes = |t: &str| -> Vec<String> {
        t.lines()
            .map(str::trim)
            .filter(|l| l.starts_with("class "))
            .map(str::to_string)
            .collect()
    };
    let current = classes(&block.current_content);
    let incoming = classes(&block.incoming_content);
    (!current.is_empty() || !incoming.is_empty()) && current != incoming
}

/// Decide the conflict type from git's hint, the path and the block contents.
pub fn classify_conflict(
    path: &str,
    kind_hint: Option<&str>,
    blocks: &[ConflictBlock],
    is_binary: bool,
    one_side_missing: bool,
) -> ConflictTypeExtended {
    if is_binary {
        return ConflictTypeExtended::Binary;
    }
    if let Some(hint) = kind_hint.map(str::to_ascii_lowercase) {
        if hint.contains("modify/delete") || hint.contains("delete/modify") {
            return ConflictTypeExtended::ModifyDelete;
        }
        if hint.contains("rename") {
            return ConflictTypeExtended::Rename;
        }
        if hint.contains("binary") {
            return ConflictTypeExtended::Binary;
        }
    }
    if one_side_missing {
        return ConflictTypeExtended::ModifyDelete;
    }
    if is_dependency_manifest(path) {
        return ConflictTypeExtended::Dependency;
    }
    if is_config_file(path) {
        return ConflictTypeExtended::Configuration;
    }
    if blocks.len() >= 3 && blocks.iter().any(changes_classes) {
        return ConflictTypeExtended::Architectural;
    }
    if blocks.iter().any(changes_definitions) {
        return ConflictTypeExtended::Semantic;
    }
    if kind_hint.map(|h| h.eq_ignore_ascii_case("add/add")).unwrap_or(false) {
        return ConflictTypeExtended::AddAdd;
    }
    if blocks.is_empty() {
        return ConflictTypeExtended::Merge;
    }
    ConflictTypeExtended::Content
}

fn whitespace_only(block: &ConflictBlock) -> bool {
    let squash = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
    squash(&block.current_content) == squash(&block.incoming_content)
}

fn bump(level: RiskLevel) -> RiskLevel {
    match level {
        RiskLevel::VeryLow => RiskLevel::Low,
        RiskLevel::Low => RiskLevel::Medium,
        RiskLevel::Medium => RiskLevel::High,
        RiskLevel::High | RiskLevel::Critical => RiskLevel::Critical,
    }
}

/// Risk from type and size, raised one level for critical paths.
pub fn assess_risk(
    conflict_type: ConflictTypeExtended,
    blocks: &[ConflictBlock],
    path: &str,
    critical_keywords: &[String],
) -> RiskLevel {
    let total_lines: usize = blocks.iter().map(ConflictBlock::total_lines).sum();
    let base = match conflict_type {
        ConflictTypeExtended::Content => {
            if !blocks.is_empty() && blocks.iter().all(whitespace_only) {
                RiskLevel::VeryLow
            } else if blocks.len() <= 1 && total_lines <= 6 {
                RiskLevel::Low
            } else if total_lines <= 40 {
                RiskLevel::Medium
            } else {
                RiskLevel::High
            }
        }
        ConflictTypeExtended::AddAdd
        | ConflictTypeExtended::Merge
        | ConflictTypeExtended::Rename
        | ConflictTypeExtended::Dependency
        | ConflictTypeExtended::Configuration => RiskLevel::Medium,
        ConflictTypeExtended::Semantic
        | ConflictTypeExtended::Architectural
        | ConflictTypeExtended::ModifyDelete
        | ConflictTypeExtended::Binary => RiskLevel::High,
    };
    let lowered = path.to_ascii_lowercase();
    if critical_keywords
        .iter()
        .any(|k| !k.is_empty() && lowered.contains(&k.to_ascii_lowercase()))
    {
        bump(base)
    } else {
        base
    }
}

/// Rough human effort in minutes.
pub fn estimate_minutes(conflict_type: ConflictTypeExtended, blocks: &[ConflictBlock], risk: RiskLevel) -> u32 {
    let base: u32 = match conflict_type {
        ConflictTypeExtended::Content => 5,
        ConflictTypeExtended::AddAdd
        | ConflictTypeExtended::Dependency
        | ConflictTypeExtended::Configuration => 10,
        ConflictTypeExtended::Merge
        | ConflictTypeExtended::ModifyDelete
        | ConflictTypeExtended::Rename => 15,
        ConflictTypeExtended::Semantic | ConflictTypeExtended::Binary => 20,
        ConflictTypeExtended::Architectural => 45,
    };
    let total_lines: usize = blocks.iter().map(ConflictBlock::total_lines).sum();
    let size = 2 * blocks.len() as u32 + (total_lines / 10) as u32;
    let factor = match risk {
        RiskLevel::Critical => 2.0,
        RiskLevel::High => 1.5,
        _ => 1.0,
    };
    ((base + size) as f64 * factor).round() as u32
}

fn describe(path: &str, conflict_type: ConflictTypeExtended, blocks: &[ConflictBlock]) -> String {
    match conflict_type {
        ConflictTypeExtended::Binary => format!("{}: binary file changed on both sides", path),
        ConflictTypeExtended::ModifyDelete => format!("{}: modified on one side, deleted on the other", path),
        ConflictTypeExtended::Rename => format!("{}: conflicting rename", path),
        _ => format!(
            "{}: {} conflicting block{} ({})",
            path,
            blocks.len(),
            if blocks.len() == 1 { "" } else { "s" },
            conflict_type
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarkerStyle;

    fn block(current: &str, incoming: &str) -> ConflictBlock {
        ConflictBlock {
            file_path: "src/app.py".into(),
            start_line: 1,
            end_line: 5,
            current_content: current.into(),
            incoming_content: incoming.into(),
            base_content: None,
            marker_style: MarkerStyle::Merge,
        }
    }

    #[test]
    fn test_content_conflict() {
        let blocks = vec![block("    return 1\n", "    return 2\n")];
        assert_eq!(
            classify_conflict("src/app.py", Some("content"), &blocks, false, false),
            ConflictTypeExtended::Content
        );
    }

    #[test]
    fn test_signature_change_is_semantic() {
        let blocks = vec![block("def f(a):\n", "def f(a, b):\n")];
        assert_eq!(
            classify_conflict("src/app.py", Some("content"), &blocks, false, false),
            ConflictTypeExtended::Semantic
        );
    }

    #[test]
    fn test_class_changes_across_blocks_are_architectural() {
        let blocks = vec![
            block("class A:\n", "class B:\n"),
            block("x = 1\n", "x = 2\n"),
            block("y = 1\n", "y = 2\n"),
        ];
        assert_eq!(
            classify_conflict("src/models.py", None, &blocks, false, false),
            ConflictTypeExtended::Architectural
        );
    }

    #[test]
    fn test_path_based_types() {
        let blocks = vec![block("a==1\n", "a==2\n")];
        assert_eq!(
            classify_conflict("requirements.txt", None, &blocks, false, false),
            ConflictTypeExtended::Dependency
        );
        assert_eq!(
            classify_conflict("deploy/settings.yaml", None, &blocks, false, false),
            ConflictTypeExtended::Configuration
        );
        assert_eq!(
            classify_conflict("img.png", None, &[], true, false),
            ConflictTypeExtended::Binary
        );
        assert_eq!(
            classify_conflict("a.py", Some("modify/delete"), &[], false, true),
            ConflictTypeExtended::ModifyDelete
        );
        assert_eq!(
            classify_conflict("a.py", Some("add/add"), &[block("x\n", "y\n")], false, false),
            ConflictTypeExtended::AddAdd
        );
    }

    #[test]
    fn test_risk_assessment() {
        let small = vec![block("    return 1\n", "    return 2\n")];
        let keywords = vec!["auth".to_string()];
        assert_eq!(
            assess_risk(ConflictTypeExtended::Content, &small, "src/app.py", &keywords),
            RiskLevel::Low
        );
        assert_eq!(
            assess_risk(ConflictTypeExtended::Content, &small, "src/auth/login.py", &keywords),
            RiskLevel::Medium
        );
        assert_eq!(
            assess_risk(ConflictTypeExtended::Semantic, &small, "src/auth.py", &keywords),
            RiskLevel::Critical
        );
        let ws = vec![block("x = 1\n", "x  =  1\n")];
        assert_eq!(
            assess_risk(ConflictTypeExtended::Content, &ws, "a.py", &keywords),
            RiskLevel::VeryLow
        );
    }

    #[test]
    fn test_kind_hints() {
        let messages = vec![
            "Auto-merging src/a.py".to_string(),
            "CONFLICT (content): Merge conflict in src/a.py".to_string(),
            "CONFLICT (modify/delete): src/b.py deleted in feature and modified in HEAD.".to_string(),
        ];
        let paths = vec!["src/a.py".to_string(), "src/b.py".to_string()];
        let hints = kind_hints(&messages, &paths);
        assert_eq!(hints.get("src/a.py").map(String::as_str), Some("content"));
        assert_eq!(hints.get("src/b.py").map(String::as_str), Some("modify/delete"));
    }

    #[test]
    fn test_parse_legacy_merge_tree() {
        let out = "\
changed in both
  base   100644 1111111111111111111111111111111111111111 src/a.py
  our    100644 2222222222222222222222222222222222222222 src/a.py
  their  100644 3333333333333333333333333333333333333333 src/a.py
@@ -1,2 +1,6 @@
 def f():
+<<<<<<< .our
added in both
  our    100644 4444444444444444444444444444444444444444 new.py
  their  100644 4444444444444444444444444444444444444444 new.py
removed in remote
  base   100644 5555555555555555555555555555555555555555 gone.py
  our    100644 6666666666666666666666666666666666666666 gone.py
";
        let parsed = parse_legacy_merge_tree(out);
        assert_eq!(
            parsed,
            vec![
                ConflictedPath {
                    path: "src/a.py".into(),
                    kind_hint: Some("content".into())
                },
                ConflictedPath {
                    path: "gone.py".into(),
                    kind_hint: Some("modify/delete".into())
                },
            ]
        );
    }

    #[test]
    fn test_synthesize_merge() {
        let base = "a\nb\nc\n";
        assert!(synthesize_merge(base, "a\nB\nc\n", base).is_none());
        let merged = synthesize_merge(base, "a\nX\nc\n", "a\nY\nc\n").unwrap();
        let blocks = parse_conflict_blocks("f", &merged);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].current_content, "X\n");
        assert_eq!(blocks[0].incoming_content, "Y\n");
        assert_eq!(blocks[0].base_content.as_deref(), Some("b\n"));
    }

    #[test]
    fn test_estimate_grows_with_risk() {
        let blocks = vec![block("x\n", "y\n")];
        let low = estimate_minutes(ConflictTypeExtended::Content, &blocks, RiskLevel::Low);
        let high = estimate_minutes(ConflictTypeExtended::Content, &blocks, RiskLevel::High);
        assert!(high > low);
    }
}
