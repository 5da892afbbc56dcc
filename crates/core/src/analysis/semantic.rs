//! Structural differences between the two sides of a conflict block.
//!
//! Only Python blocks are examined. When the block carries a base section,
//! removals are judged against it; otherwise only differences that cannot
//! be explained by one side adding code are reported.

use std::collections::BTreeMap;

use tracing::debug;

use crate::analysis::ast::{AstAnalyzer, CodeStructure, FunctionInfo, SourceLanguage};
use crate::models::{
    Conflict, ConflictBlock, RiskLevel, SemanticConflictDetail, SemanticConflictType,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct SemanticAnalyzer {
    ast: AstAnalyzer,
}

fn signature(f: &FunctionInfo) -> String {
    let ret = f
        .return_annotation
        .as_deref()
        .map(|r| format!(" -> {}", r))
        .unwrap_or_default();
    format!(
        "{}def {}({}){}",
        if f.is_async { "async " } else { "" },
        f.name,
        f.parameters.join(", "),
        ret
    )
}

fn finding(
    kind: SemanticConflictType,
    severity: RiskLevel,
    description: String,
    symbols: Vec<String>,
    evidence: Vec<String>,
    suggestion: &str,
) -> SemanticConflictDetail {
    SemanticConflictDetail {
        kind,
        description,
        severity,
        affected_symbols: symbols,
        evidence,
        suggestions: vec![suggestion.to_string()],
    }
}

impl SemanticAnalyzer {
    pub fn new() -> Self {
        Self {
            ast: AstAnalyzer::new(),
        }
    }

    /// Findings for every Python block of `conflict`.
    pub fn analyze_conflict(&self, conflict: &Conflict) -> Vec<SemanticConflictDetail> {
        let findings: Vec<SemanticConflictDetail> = conflict
            .blocks()
            .iter()
            .flat_map(|b| self.analyze_block(b))
            .collect();
        debug!(conflict_id = %conflict.id, findings = findings.len(), "semantic analysis complete");
        findings
    }

    pub fn analyze_block(&self, block: &ConflictBlock) -> Vec<SemanticConflictDetail> {
        if SourceLanguage::for_path(&block.file_path) != SourceLanguage::Python {
            return Vec::new();
        }
        let current = self.ast.analyze_structure(&block.current_content);
        let incoming = self.ast.analyze_structure(&block.incoming_content);
        let base = block
            .base_content
            .as_deref()
            .map(|b| self.ast.analyze_structure(b));
        self.compare_structures(&current, &incoming, base.as_ref())
    }

    /// Compare two structures, with the common ancestor when known.
    pub fn compare_structures(
        &self,
        current: &CodeStructure,
        incoming: &CodeStructure,
        base: Option<&CodeStructure>,
    ) -> Vec<SemanticConflictDetail> {
        let mut findings = Vec::new();
        self.compare_functions(current, incoming, &mut findings);
        self.check_shadowing(current, incoming, &mut findings);
        self.compare_imports(current, incoming, base, &mut findings);
        self.compare_classes(current, incoming, &mut findings);
        if let Some(base) = base {
            self.check_removals(current, incoming, base, &mut findings);
        }
        findings
    }

    fn compare_functions(
        &self,
        current: &CodeStructure,
        incoming: &CodeStructure,
        out: &mut Vec<SemanticConflictDetail>,
    ) {
        for ours in &current.functions {
            let Some(theirs) = incoming.function(&ours.name) else {
                continue;
            };
            let evidence = vec![
                format!("current: {}", signature(ours)),
                format!("incoming: {}", signature(theirs)),
            ];
            if ours.parameters != theirs.parameters || ours.is_async != theirs.is_async {
                out.push(finding(
                    SemanticConflictType::SignatureChange,
                    RiskLevel::High,
                    format!("'{}' has a different signature on each side", ours.name),
                    vec![ours.name.clone()],
                    evidence.clone(),
                    "Reconcile the parameter lists and update every call site",
                ));
            }
            if ours.has_type_hints != theirs.has_type_hints {
                out.push(finding(
                    SemanticConflictType::SignatureChange,
                    RiskLevel::Medium,
                    format!("type hints were added or removed on '{}'", ours.name),
                    vec![ours.name.clone()],
                    evidence.clone(),
                    "Keep the annotated version and check callers still type-check",
                ));
            }
            if ours.has_error_handling != theirs.has_error_handling {
                out.push(finding(
                    SemanticConflictType::SignatureChange,
                    RiskLevel::Medium,
                    format!("error handling differs in '{}'", ours.name),
                    vec![ours.name.clone()],
                    evidence,
                    "Make sure the merged body keeps the try/except guard",
                ));
            }
        }
    }

    fn check_shadowing(
        &self,
        current: &CodeStructure,
        incoming: &CodeStructure,
        out: &mut Vec<SemanticConflictDetail>,
    ) {
        let sides = [("current", current, incoming), ("incoming", incoming, current)];
        for (label, defining, other) in sides {
            let imported = other.import_names();
            let defined = defining
                .functions
                .iter()
                .map(|f| (f.name.as_str(), f.line))
                .chain(defining.classes.iter().map(|c| (c.name.as_str(), c.line)));
            for (name, line) in defined {
                if imported.contains(name) {
                    out.push(finding(
                        SemanticConflictType::NameShadowing,
                        RiskLevel::High,
                        format!("{} side defines '{}', shadowing an import from the other side", label, name),
                        vec![name.to_string()],
                        vec![format!("{} line {}: definition of {}", label, line, name)],
                        "Rename the definition or alias the import",
                    ));
                }
            }
        }
    }

    fn compare_imports(
        &self,
        current: &CodeStructure,
        incoming: &CodeStructure,
        base: Option<&CodeStructure>,
        out: &mut Vec<SemanticConflictDetail>,
    ) {
        let origin = |s: &CodeStructure| -> BTreeMap<String, String> {
            s.imports
                .iter()
                .map(|i| {
                    let source = match &i.name {
                        Some(n) => format!("{}.{}", i.module, n),
                        None => i.module.clone(),
                    };
                    (i.bound_name(), source)
                })
                .collect()
        };
        let ours = origin(current);
        let theirs = origin(incoming);
        for (name, our_source) in &ours {
            if let Some(their_source) = theirs.get(name) {
                if our_source != their_source {
                    out.push(finding(
                        SemanticConflictType::ImportShadowing,
                        RiskLevel::High,
                        format!("'{}' is imported from different modules", name),
                        vec![name.clone()],
                        vec![
                            format!("current: {}", our_source),
                            format!("incoming: {}", their_source),
                        ],
                        "Pick one origin and alias the other import",
                    ));
                }
            }
        }

        let Some(base) = base else {
            return;
        };
        let base_names = base.import_names();
        for name in &base_names {
            let in_ours = ours.contains_key(name);
            let in_theirs = theirs.contains_key(name);
            if in_ours != in_theirs {
                let side = if in_ours { "incoming" } else { "current" };
                out.push(finding(
                    SemanticConflictType::ImportRemoved,
                    RiskLevel::Medium,
                    format!("{} side removed import '{}'", side, name),
                    vec![name.clone()],
                    vec![format!("base imports {}", name)],
                    "Check whether the other side still uses the removed import",
                ));
            }
        }
    }

    fn compare_classes(
        &self,
        current: &CodeStructure,
        incoming: &CodeStructure,
        out: &mut Vec<SemanticConflictDetail>,
    ) {
        for ours in &current.classes {
            let Some(theirs) = incoming.class(&ours.name) else {
                continue;
            };
            if ours.bases != theirs.bases {
                out.push(finding(
                    SemanticConflictType::ClassNameConflict,
                    RiskLevel::Medium,
                    format!("class '{}' has different base classes on each side", ours.name),
                    vec![ours.name.clone()],
                    vec![
                        format!("current: class {}({})", ours.name, ours.bases.join(", ")),
                        format!("incoming: class {}({})", theirs.name, theirs.bases.join(", ")),
                    ],
                    "Decide on one hierarchy and verify method resolution order",
                ));
            }
        }
    }

    fn check_removals(
        &self,
        current: &CodeStructure,
        incoming: &CodeStructure,
        base: &CodeStructure,
        out: &mut Vec<SemanticConflictDetail>,
    ) {
        for f in &base.functions {
            let in_ours = current.function(&f.name).is_some();
            let in_theirs = incoming.function(&f.name).is_some();
            if in_ours != in_theirs {
                let (remover, keeper) = if in_ours {
                    ("incoming", current)
                } else {
                    ("current", incoming)
                };
                let kept = keeper.function(&f.name).map(signature).unwrap_or_default();
                out.push(finding(
                    SemanticConflictType::FunctionRemoved,
                    RiskLevel::High,
                    format!("{} side removed function '{}' the other side still changes", remover, f.name),
                    vec![f.name.clone()],
                    vec![format!("base: {}", signature(f)), format!("kept: {}", kept)],
                    "Confirm the function is unused before accepting the removal",
                ));
            }
        }
        for c in &base.classes {
            let in_ours = current.class(&c.name).is_some();
            let in_theirs = incoming.class(&c.name).is_some();
            if in_ours != in_theirs {
                let remover = if in_ours { "incoming" } else { "current" };
                out.push(finding(
                    SemanticConflictType::ClassRemoved,
                    RiskLevel::High,
                    format!("{} side removed class '{}'", remover, c.name),
                    vec![c.name.clone()],
                    vec![format!("base defines class {} at line {}", c.name, c.line)],
                    "Check subclasses and imports of the removed class",
                ));
            }
        }
    }
}

/// Overall risk from a set of findings.
pub fn calculate_semantic_risk(findings: &[SemanticConflictDetail]) -> RiskLevel {
    let count = |level: RiskLevel| findings.iter().filter(|f| f.severity == level).count();
    let critical = count(RiskLevel::Critical);
    let high = count(RiskLevel::High);
    let medium = count(RiskLevel::Medium);
    if critical > 0 || high > 2 {
        RiskLevel::Critical
    } else if high > 0 || medium > 3 {
        RiskLevel::High
    } else if medium > 0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarkerStyle;

    fn block(current: &str, base: Option<&str>, incoming: &str) -> ConflictBlock {
        ConflictBlock {
            file_path: "svc/api.py".into(),
            start_line: 1,
            end_line: 10,
            current_content: current.into(),
            incoming_content: incoming.into(),
            base_content: base.map(str::to_string),
            marker_style: MarkerStyle::Merge,
        }
    }

    fn kinds(findings: &[SemanticConflictDetail]) -> Vec<SemanticConflictType> {
        findings.iter().map(|f| f.kind).collect()
    }

    #[test]
    fn test_signature_change() {
        let findings = SemanticAnalyzer::new().analyze_block(&block(
            "def load(path):\n    return open(path)\n",
            None,
            "def load(path, mode):\n    return open(path, mode)\n",
        ));
        assert_eq!(kinds(&findings), vec![SemanticConflictType::SignatureChange]);
        assert_eq!(findings[0].severity, RiskLevel::High);
        assert_eq!(findings[0].affected_symbols, vec!["load"]);
    }

    #[test]
    fn test_type_hint_and_error_handling_flips() {
        let findings = SemanticAnalyzer::new().analyze_block(&block(
            "def f(x):\n    return x\n",
            None,
            "def f(x) -> int:\n    try:\n        return x\n    except ValueError:\n        return 0\n",
        ));
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.severity == RiskLevel::Medium));
    }

    #[test]
    fn test_name_shadowing() {
        let findings = SemanticAnalyzer::new().analyze_block(&block(
            "from json import loads\n",
            None,
            "def loads(s):\n    return s\n",
        ));
        assert!(kinds(&findings).contains(&SemanticConflictType::NameShadowing));
    }

    #[test]
    fn test_import_shadowing_and_removal() {
        let findings = SemanticAnalyzer::new().analyze_block(&block(
            "from a import helper\n",
            Some("from a import helper\nimport os\n"),
            "from b import helper\nimport os\n",
        ));
        let k = kinds(&findings);
        assert!(k.contains(&SemanticConflictType::ImportShadowing));
        assert!(k.contains(&SemanticConflictType::ImportRemoved));
    }

    #[test]
    fn test_removals_against_base() {
        let base = "def keep():\n    pass\n\nclass Old:\n    pass\n";
        let findings = SemanticAnalyzer::new().analyze_block(&block(
            "def keep():\n    return 1\n",
            Some(base),
            "def keep():\n    return 2\n\nclass Old:\n    pass\n",
        ));
        assert_eq!(kinds(&findings), vec![SemanticConflictType::ClassRemoved]);
    }

    #[test]
    fn test_non_python_blocks_are_skipped() {
        let mut b = block("def f(a):\n", None, "def f(b):\n");
        b.file_path = "README.md".into();
        assert!(SemanticAnalyzer::new().analyze_block(&b).is_empty());
    }

    #[test]
    fn test_calculate_semantic_risk() {
        let make = |severity| SemanticConflictDetail {
            kind: SemanticConflictType::SignatureChange,
            description: String::new(),
            severity,
            affected_symbols: vec![],
            evidence: vec![],
            suggestions: vec![],
        };
        assert_eq!(calculate_semantic_risk(&[]), RiskLevel::Low);
        assert_eq!(calculate_semantic_risk(&[make(RiskLevel::Medium)]), RiskLevel::Medium);
        assert_eq!(
            calculate_semantic_risk(&vec![make(RiskLevel::Medium); 4]),
            RiskLevel::High
        );
        assert_eq!(calculate_semantic_risk(&[make(RiskLevel::High)]), RiskLevel::High);
        assert_eq!(
            calculate_semantic_risk(&vec![make(RiskLevel::High); 3]),
            RiskLevel::Critical
        );
        assert_eq!(
            calculate_semantic_risk(&[make(RiskLevel::Critical)]),
            RiskLevel::Critical
        );
    }
}
