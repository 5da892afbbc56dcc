//! Module import graph and cycle detection.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::ast::AstAnalyzer;
use crate::analysis::constitutional::python_sources;

/// Directed graph of module -> imported module.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyCycle {
    /// Modules in the cycle, sorted.
    pub modules: Vec<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module(&mut self, name: &str) -> NodeIndex {
        if let Some(idx) = self.index.get(name) {
            return *idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }

    pub fn add_dependency(&mut self, from: &str, to: &str) {
        let a = self.add_module(from);
        let b = self.add_module(to);
        if !self.graph.contains_edge(a, b) {
            self.graph.add_edge(a, b, ());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn module_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn dependencies_of(&self, name: &str) -> BTreeSet<String> {
        self.index
            .get(name)
            .map(|idx| {
                self.graph
                    .neighbors(*idx)
                    .map(|n| self.graph[n].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Strongly connected components with more than one module, plus
    /// modules importing themselves.
    pub fn find_cycles(&self) -> Vec<DependencyCycle> {
        let mut cycles: Vec<DependencyCycle> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || (scc.len() == 1 && self.graph.contains_edge(scc[0], scc[0])))
            .map(|scc| {
                let mut modules: Vec<String> = scc.iter().map(|i| self.graph[*i].clone()).collect();
                modules.sort();
                DependencyCycle { modules }
            })
            .collect();
        cycles.sort_by(|a, b| a.modules.cmp(&b.modules));
        cycles
    }
}

/// `pkg/sub/mod.py` -> `pkg.sub.mod`, `pkg/__init__.py` -> `pkg`.
pub fn module_name(rel_path: &str) -> String {
    let trimmed = rel_path
        .trim_end_matches(".pyi")
        .trim_end_matches(".py")
        .replace('\\', "/");
    let trimmed = trimmed.strip_suffix("/__init__").unwrap_or(&trimmed);
    trimmed.trim_matches('/').replace('/', ".")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyAnalyzer {
    ast: AstAnalyzer,
}

impl DependencyAnalyzer {
    pub fn new() -> Self {
        Self {
            ast: AstAnalyzer::new(),
        }
    }

    /// Build the graph of internal imports between the given files.
    pub fn build_graph<'a>(&self, sources: impl IntoIterator<Item = (&'a str, &'a str)>) -> DependencyGraph {
        let files: Vec<(String, bool, &str)> = sources
            .into_iter()
            .map(|(path, source)| (module_name(path), path.ends_with("__init__.py"), source))
            .collect();

        let mut graph = DependencyGraph::new();
        for (name, _, _) in &files {
            graph.add_module(name);
        }

        for (name, is_package, source) in &files {
            let structure = self.ast.analyze_structure(source);
            for import in &structure.imports {
                let Some(module) = resolve_module(name, *is_package, &import.module) else {
                    continue;
                };
                let target = match &import.name {
                    Some(member) if graph.contains(&format!("{}.{}", module, member)) => {
                        format!("{}.{}", module, member)
                    }
                    _ => module,
                };
                if let Some(found) = longest_known_prefix(&graph, &target) {
                    graph.add_dependency(name, &found);
                }
            }
        }
        debug!(modules = graph.module_count(), edges = graph.edge_count(), "dependency graph built");
        graph
    }

    /// Graph of every Python file below `root`.
    pub fn build_graph_from_directory(&self, root: &Path) -> DependencyGraph {
        let sources = python_sources(root);
        self.build_graph(sources.iter().map(|(p, s)| (p.as_str(), s.as_str())))
    }
}

/// Resolve relative imports (`.x`, `..y`) against the importing module.
fn resolve_module(importer: &str, is_package: bool, module: &str) -> Option<String> {
    let dots = module.chars().take_while(|c| *c == '.').count();
    if dots == 0 {
        return Some(module.to_string());
    }
    let mut parts: Vec<&str> = importer.split('.').filter(|p| !p.is_empty()).collect();
    if !is_package {
        parts.pop();
    }
    for _ in 1..dots {
        parts.pop()?;
    }
    let rest = &module[dots..];
    if !rest.is_empty() {
        parts.push(rest);
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("."))
}

fn longest_known_prefix(graph: &DependencyGraph, target: &str) -> Option<String> {
    let mut candidate = target.to_string();
    loop {
        if graph.contains(&candidate) {
            return Some(candidate);
        }
        let (head, _) = candidate.rsplit_once('.')?;
        candidate = head.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_name() {
        assert_eq!(module_name("pkg/sub/mod.py"), "pkg.sub.mod");
        assert_eq!(module_name("pkg/__init__.py"), "pkg");
        assert_eq!(module_name("top.py"), "top");
    }

    #[test]
    fn test_resolve_relative() {
        assert_eq!(resolve_module("pkg.a", false, ".b").as_deref(), Some("pkg.b"));
        assert_eq!(resolve_module("pkg.sub.a", false, "..c").as_deref(), Some("pkg.c"));
        assert_eq!(resolve_module("pkg", true, ".a").as_deref(), Some("pkg.a"));
        assert_eq!(resolve_module("a", false, "..x"), None);
    }

    #[test]
    fn test_detects_cycle() {
        let analyzer = DependencyAnalyzer::new();
        let graph = analyzer.build_graph([
            ("pkg/__init__.py", ""),
            ("pkg/a.py", "from pkg import b\n"),
            ("pkg/b.py", "from .c import thing\n"),
            ("pkg/c.py", "import pkg.a\nimport os\n"),
            ("pkg/d.py", "from pkg.a import helper\n"),
        ]);
        assert_eq!(graph.dependencies_of("pkg.a"), BTreeSet::from(["pkg.b".to_string()]));
        assert_eq!(graph.dependencies_of("pkg.d"), BTreeSet::from(["pkg.a".to_string()]));
        let cycles = graph.find_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].modules, vec!["pkg.a", "pkg.b", "pkg.c"]);
    }

    #[test]
    fn test_self_import_is_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "a");
        graph.add_dependency("b", "a");
        let cycles = graph.find_cycles();
        assert_eq!(cycles, vec![DependencyCycle { modules: vec!["a".into()] }]);
    }

    #[test]
    fn test_acyclic_graph() {
        let analyzer = DependencyAnalyzer::new();
        let graph = analyzer.build_graph([("a.py", "import b\n"), ("b.py", "import json\n")]);
        assert!(graph.find_cycles().is_empty());
        assert_eq!(graph.edge_count(), 1);
    }
}
