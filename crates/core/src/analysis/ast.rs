//! Python structure extraction and equivalence on top of tree-sitter.
//!
//! Conflict blocks are usually fragments lifted out of a function body, so
//! every entry point dedents its input before parsing. Input that does not
//! parse cleanly yields an empty [`CodeStructure`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;
use tree_sitter::{Node, Parser, Tree};

/// Languages the analyzer distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLanguage {
    Python,
    Other,
}

impl SourceLanguage {
    pub fn for_path(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".py") || lower.ends_with(".pyi") {
            Self::Python
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    pub parameters: Vec<String>,
    pub return_annotation: Option<String>,
    pub has_type_hints: bool,
    pub has_error_handling: bool,
    pub has_docstring: bool,
    pub is_async: bool,
    /// 1-based line of the `def`.
    pub line: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,
    pub bases: Vec<String>,
    pub methods: Vec<String>,
    pub line: usize,
}

/// One imported binding (`import a.b as c`, `from a import b`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportInfo {
    pub module: String,
    /// Imported member for `from` imports.
    pub name: Option<String>,
    pub alias: Option<String>,
    pub line: usize,
}

impl ImportInfo {
    /// The name this import binds in the importing module.
    pub fn bound_name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.name {
            Some(name) => name.clone(),
            None => self.module.split('.').next().unwrap_or(&self.module).to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeStructure {
    pub functions: Vec<FunctionInfo>,
    pub classes: Vec<ClassInfo>,
    pub imports: Vec<ImportInfo>,
    pub docstrings: Vec<String>,
    pub has_type_hints: bool,
    pub has_error_handling: bool,
}

impl CodeStructure {
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.classes.is_empty() && self.imports.is_empty()
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn import_names(&self) -> BTreeSet<String> {
        self.imports.iter().map(ImportInfo::bound_name).collect()
    }
}

/// Strip the common leading indentation from every non-blank line.
pub fn dedent(code: &str) -> String {
    let indent = code
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start_matches([' ', '\t']).len())
        .min()
        .unwrap_or(0);
    if indent == 0 {
        return code.to_string();
    }
    code.split_inclusive('\n')
        .map(|line| {
            if line.trim().is_empty() {
                line.trim_start_matches([' ', '\t'])
            } else {
                &line[indent..]
            }
        })
        .collect()
}

/// Stateless analyzer; a parser is created per call because
/// `tree_sitter::Parser` is not `Sync`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AstAnalyzer;

impl AstAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Parse dedented Python; `None` when the grammar reports any error.
    fn parse_python(&self, source: &str) -> Option<Tree> {
        let mut parser = Parser::new();
        let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
        if let Err(e) = parser.set_language(&language) {
            debug!(error = %e, "python grammar unavailable");
            return None;
        }
        let tree = parser.parse(source, None)?;
        if tree.root_node().has_error() {
            return None;
        }
        Some(tree)
    }

    pub fn is_valid_python(&self, code: &str) -> bool {
        self.parse_python(&dedent(code)).is_some()
    }

    /// Python parses; anything else only needs balanced brackets.
    pub fn is_valid_for_path(&self, path: &str, code: &str) -> bool {
        match SourceLanguage::for_path(path) {
            SourceLanguage::Python => self.is_valid_python(code),
            SourceLanguage::Other => brackets_balanced(code),
        }
    }

    pub fn analyze_structure(&self, code: &str) -> CodeStructure {
        let source = dedent(code);
        let Some(tree) = self.parse_python(&source) else {
            return CodeStructure::default();
        };
        let mut structure = CodeStructure::default();
        let root = tree.root_node();
        if let Some(doc) = docstring_of(root, source.as_bytes()) {
            structure.docstrings.push(doc);
        }
        collect(root, source.as_bytes(), &mut structure);
        structure.has_type_hints = structure.functions.iter().any(|f| f.has_type_hints);
        structure.has_error_handling = contains_kind(root, "try_statement");
        structure
    }

    /// Token sequence of the canonical parse tree, or `None` if unparseable.
    pub fn canonical_tokens(&self, code: &str) -> Option<Vec<String>> {
        let source = dedent(code);
        let tree = self.parse_python(&source)?;
        let mut tokens = Vec::new();
        canonicalize(tree.root_node(), source.as_bytes(), &mut tokens);
        Some(tokens)
    }

    /// Same canonical parse tree (positions, whitespace, comments and quote
    /// style ignored). Unparseable input falls back to whitespace-insensitive
    /// text comparison.
    pub fn are_equivalent(&self, code1: &str, code2: &str) -> bool {
        match (self.canonical_tokens(code1), self.canonical_tokens(code2)) {
            (Some(a), Some(b)) => a == b,
            _ => normalize_whitespace(code1) == normalize_whitespace(code2),
        }
    }

    pub fn are_equivalent_for_path(&self, path: &str, code1: &str, code2: &str) -> bool {
        match SourceLanguage::for_path(path) {
            SourceLanguage::Python => self.are_equivalent(code1, code2),
            SourceLanguage::Other => normalize_whitespace(code1) == normalize_whitespace(code2),
        }
    }
}

pub fn normalize_whitespace(code: &str) -> String {
    code.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Bracket balance that skips quoted strings.
pub fn brackets_balanced(code: &str) -> bool {
    let mut stack: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in code.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q || c == '\n' {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let open = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(open) {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

// ---------------------------------------------------------------------------
// Tree walking
// ---------------------------------------------------------------------------

fn text<'a>(node: Node<'_>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

fn children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

fn contains_kind(node: Node<'_>, kind: &str) -> bool {
    if node.kind() == kind {
        return true;
    }
    children(node).into_iter().any(|c| contains_kind(c, kind))
}

/// The string literal opening a module, class or function body.
fn docstring_of(body: Node<'_>, source: &[u8]) -> Option<String> {
    let first = named_children(body).into_iter().find(|n| n.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = named_children(first).into_iter().next()?;
    if expr.kind() != "string" {
        return None;
    }
    let content: String = named_children(expr)
        .into_iter()
        .filter(|n| n.kind() == "string_content")
        .map(|n| text(n, source))
        .collect();
    Some(content.trim().to_string())
}

fn collect(node: Node<'_>, source: &[u8], out: &mut CodeStructure) {
    match node.kind() {
        "function_definition" => {
            let info = function_info(node, source);
            if let Some(body) = node.child_by_field_name("body") {
                if let Some(doc) = docstring_of(body, source) {
                    out.docstrings.push(doc);
                }
            }
            out.functions.push(info);
        }
        "class_definition" => {
            let info = class_info(node, source);
            if let Some(body) = node.child_by_field_name("body") {
                if let Some(doc) = docstring_of(body, source) {
                    out.docstrings.push(doc);
                }
            }
            out.classes.push(info);
        }
        "import_statement" => {
            out.imports.extend(imports_of(node, source, None));
            return;
        }
        "import_from_statement" => {
            let module = node
                .child_by_field_name("module_name")
                .map(|m| text(m, source).to_string())
                .unwrap_or_default();
            out.imports.extend(imports_of(node, source, Some(module)));
            return;
        }
        _ => {}
    }
    for child in children(node) {
        collect(child, source, out);
    }
}

fn function_info(node: Node<'_>, source: &[u8]) -> FunctionInfo {
    let name = node
        .child_by_field_name("name")
        .map(|n| text(n, source).to_string())
        .unwrap_or_default();
    let mut parameters = Vec::new();
    let mut typed = false;
    if let Some(params) = node.child_by_field_name("parameters") {
        for param in named_children(params) {
            let (param_name, param_typed) = match param.kind() {
                "identifier" => (text(param, source).to_string(), false),
                "typed_parameter" => {
                    let ident = named_children(param)
                        .into_iter()
                        .next()
                        .map(|n| text(n, source).to_string())
                        .unwrap_or_default();
                    (ident, true)
                }
                "default_parameter" | "typed_default_parameter" => {
                    let ident = param
                        .child_by_field_name("name")
                        .map(|n| text(n, source).to_string())
                        .unwrap_or_default();
                    (ident, param.kind() == "typed_default_parameter")
                }
                "comment" => continue,
                _ => (text(param, source).to_string(), false),
            };
            typed |= param_typed;
            parameters.push(param_name);
        }
    }
    let return_annotation = node
        .child_by_field_name("return_type")
        .map(|n| text(n, source).to_string());
    let body = node.child_by_field_name("body");
    FunctionInfo {
        name,
        parameters,
        has_type_hints: typed || return_annotation.is_some(),
        return_annotation,
        has_error_handling: body.map(|b| contains_kind(b, "try_statement")).unwrap_or(false),
        has_docstring: body.and_then(|b| docstring_of(b, source)).is_some(),
        is_async: children(node).iter().any(|c| c.kind() == "async"),
        line: node.start_position().row + 1,
    }
}

fn class_info(node: Node<'_>, source: &[u8]) -> ClassInfo {
    let name = node
        .child_by_field_name("name")
        .map(|n| text(n, source).to_string())
        .unwrap_or_default();
    let bases = node
        .child_by_field_name("superclasses")
        .map(|args| {
            named_children(args)
                .into_iter()
                .filter(|n| n.kind() != "comment")
                .map(|n| text(n, source).to_string())
                .collect()
        })
        .unwrap_or_default();
    let methods = node
        .child_by_field_name("body")
        .map(|body| {
            named_children(body)
                .into_iter()
                .filter_map(|member| {
                    let def = if member.kind() == "decorated_definition" {
                        member.child_by_field_name("definition")?
                    } else {
                        member
                    };
                    (def.kind() == "function_definition")
                        .then(|| def.child_by_field_name("name"))
                        .flatten()
                        .map(|n| text(n, source).to_string())
                })
                .collect()
        })
        .unwrap_or_default();
    ClassInfo {
        name,
        bases,
        methods,
        line: node.start_position().row + 1,
    }
}

fn imports_of(node: Node<'_>, source: &[u8], from_module: Option<String>) -> Vec<ImportInfo> {
    let line = node.start_position().row + 1;
    let mut cursor = node.walk();
    let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
    let mut out = Vec::new();
    if names.is_empty() && from_module.is_some() && contains_kind(node, "wildcard_import") {
        out.push(ImportInfo {
            module: from_module.clone().unwrap_or_default(),
            name: Some("*".into()),
            alias: None,
            line,
        });
        return out;
    }
    for name_node in names {
        let (target, alias) = if name_node.kind() == "aliased_import" {
            (
                name_node
                    .child_by_field_name("name")
                    .map(|n| text(n, source).to_string())
                    .unwrap_or_default(),
                name_node
                    .child_by_field_name("alias")
                    .map(|n| text(n, source).to_string()),
            )
        } else {
            (text(name_node, source).to_string(), None)
        };
        let info = match &from_module {
            Some(module) => ImportInfo {
                module: module.clone(),
                name: Some(target),
                alias,
                line,
            },
            None => ImportInfo {
                module: target,
                name: None,
                alias,
                line,
            },
        };
        out.push(info);
    }
    out
}

/// Pre-order token stream: named inner nodes open and close a group, leaves
/// contribute their text. Comments are dropped and string delimiters are
/// reduced to their prefix so `'a'` and `"a"` compare equal.
fn canonicalize(node: Node<'_>, source: &[u8], out: &mut Vec<String>) {
    match node.kind() {
        "comment" => return,
        "string_start" => {
            let prefix: String = text(node, source)
                .chars()
                .filter(|c| c.is_ascii_alphabetic())
                .map(|c| c.to_ascii_lowercase())
                .collect();
            out.push(format!("{}\"", prefix));
            return;
        }
        "string_end" => {
            out.push("\"".into());
            return;
        }
        _ => {}
    }
    let kids = children(node);
    if kids.is_empty() {
        out.push(text(node, source).to_string());
        return;
    }
    let named = node.is_named();
    if named {
        out.push(format!("({}", node.kind()));
    }
    for child in kids {
        canonicalize(child, source, out);
    }
    if named {
        out.push(")".into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedent() {
        assert_eq!(dedent("    a\n      b\n\n    c\n"), "a\n  b\n\nc\n");
        assert_eq!(dedent("a\n  b\n"), "a\n  b\n");
    }

    #[test]
    fn test_analyze_structure() {
        let code = r#"
"""Module doc."""
import os
import numpy as np
from typing import Optional, List as L

class Repo(Base):
    """Stores things."""
    def get(self, key: str) -> Optional[str]:
        try:
            return self.data[key]
        except KeyError:
            return None

async def fetch(url, timeout=5):
    return url
"#;
        let s = AstAnalyzer::new().analyze_structure(code);
        assert_eq!(s.classes.len(), 1);
        assert_eq!(s.classes[0].name, "Repo");
        assert_eq!(s.classes[0].bases, vec!["Base"]);
        assert_eq!(s.classes[0].methods, vec!["get"]);

        let get = s.function("get").unwrap();
        assert_eq!(get.parameters, vec!["self", "key"]);
        assert!(get.has_type_hints);
        assert!(get.has_error_handling);
        assert!(!get.is_async);

        let fetch = s.function("fetch").unwrap();
        assert!(fetch.is_async);
        assert_eq!(fetch.parameters, vec!["url", "timeout"]);
        assert!(!fetch.has_type_hints);

        let names = s.import_names();
        assert!(names.contains("os"));
        assert!(names.contains("np"));
        assert!(names.contains("Optional"));
        assert!(names.contains("L"));
        assert!(s.docstrings.iter().any(|d| d == "Module doc."));
        assert!(s.has_type_hints);
        assert!(s.has_error_handling);
    }

    #[test]
    fn test_unparseable_yields_empty() {
        let s = AstAnalyzer::new().analyze_structure("def broken(:\n");
        assert!(s.is_empty());
        assert!(!AstAnalyzer::new().is_valid_python("def broken(:\n"));
    }

    #[test]
    fn test_indented_fragment_parses() {
        let analyzer = AstAnalyzer::new();
        assert!(analyzer.is_valid_python("        return 1\n"));
        assert!(analyzer.is_valid_python("    x = compute()\n    y = x + 1\n"));
    }

    #[test]
    fn test_equivalence_ignores_formatting() {
        let analyzer = AstAnalyzer::new();
        assert!(analyzer.are_equivalent("x = f(a,b)  # note\n", "x = f(a, b)\n"));
        assert!(analyzer.are_equivalent("s = 'hi'\n", "s = \"hi\"\n"));
        assert!(!analyzer.are_equivalent("return 1\n", "return 2\n"));
        assert!(!analyzer.are_equivalent(
            "if x:\n    a()\n    b()\n",
            "if x:\n    a()\nb()\n"
        ));
    }

    #[test]
    fn test_non_python_fallbacks() {
        let analyzer = AstAnalyzer::new();
        assert!(analyzer.are_equivalent_for_path("a.js", "f( a );", "f( a\n);"));
        assert!(analyzer.is_valid_for_path("a.js", "function f() { return [1, 2]; }"));
        assert!(!analyzer.is_valid_for_path("a.js", "function f() { return [1, 2; }"));
    }

    #[test]
    fn test_brackets_balanced_skips_strings() {
        assert!(brackets_balanced("print(\"(\")"));
        assert!(!brackets_balanced("(]"));
        assert!(!brackets_balanced("(("));
    }
}
