//! Block-level semantic merge.
//!
//! Textual fast paths first (a side identical to base loses to the other
//! side), then the same questions asked of the canonical parse trees, so a
//! reformatting on one side does not block the other side's real change.

use tracing::debug;

use crate::analysis::ast::AstAnalyzer;
use crate::models::ConflictBlock;

/// Resolves a [`ConflictBlock`] automatically when the sides are reconcilable.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemanticMerger {
    ast: AstAnalyzer,
}

impl SemanticMerger {
    pub fn new() -> Self {
        Self {
            ast: AstAnalyzer::new(),
        }
    }

    fn equivalent(&self, path: &str, a: &str, b: &str) -> bool {
        self.ast.are_equivalent_for_path(path, a, b)
    }

    /// Merged content for `block`, or `None` when a human has to decide.
    pub fn merge_block(&self, block: &ConflictBlock) -> Option<String> {
        let path = block.file_path.as_str();
        let current = block.current_content.as_str();
        let incoming = block.incoming_content.as_str();

        match block.base_content.as_deref() {
            Some(base) => {
                if current == base {
                    debug!(path, "current == base, taking incoming");
                    return Some(incoming.to_string());
                }
                if incoming == base {
                    debug!(path, "incoming == base, taking current");
                    return Some(current.to_string());
                }
                if current == incoming {
                    return Some(current.to_string());
                }

                let current_changed = !self.equivalent(path, current, base);
                let incoming_changed = !self.equivalent(path, incoming, base);
                match (current_changed, incoming_changed) {
                    (false, false) => Some(incoming.to_string()),
                    (true, false) => {
                        debug!(path, "only current changed semantically");
                        Some(current.to_string())
                    }
                    (false, true) => {
                        debug!(path, "only incoming changed semantically");
                        Some(incoming.to_string())
                    }
                    (true, true) if self.equivalent(path, current, incoming) => {
                        debug!(path, "both sides made the same semantic change");
                        Some(current.to_string())
                    }
                    (true, true) => None,
                }
            }
            None => {
                if current == incoming || self.equivalent(path, current, incoming) {
                    Some(current.to_string())
                } else {
                    None
                }
            }
        }
    }

    /// True when every block of a conflict merges.
    pub fn can_merge_all(&self, blocks: &[ConflictBlock]) -> bool {
        !blocks.is_empty() && blocks.iter().all(|b| self.merge_block(b).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarkerStyle;
    use proptest::prelude::*;

    fn block(current: &str, base: Option<&str>, incoming: &str) -> ConflictBlock {
        ConflictBlock {
            file_path: "src/app.py".into(),
            start_line: 1,
            end_line: 7,
            current_content: current.into(),
            incoming_content: incoming.into(),
            base_content: base.map(str::to_string),
            marker_style: if base.is_some() {
                MarkerStyle::Diff3
            } else {
                MarkerStyle::Merge
            },
        }
    }

    #[test]
    fn test_textual_fast_paths() {
        let merger = SemanticMerger::new();
        let base = "x = 1\n";
        assert_eq!(
            merger.merge_block(&block(base, Some(base), "x = 2\n")).as_deref(),
            Some("x = 2\n")
        );
        assert_eq!(
            merger.merge_block(&block("x = 3\n", Some(base), base)).as_deref(),
            Some("x = 3\n")
        );
        assert_eq!(
            merger.merge_block(&block("x = 4\n", Some(base), "x = 4\n")).as_deref(),
            Some("x = 4\n")
        );
    }

    #[test]
    fn test_reformat_on_one_side_keeps_real_change() {
        let merger = SemanticMerger::new();
        let base = "y = f(a,b)\n";
        let current = "y = f(a, b)  # tidy\n";
        let incoming = "y = f(a, c)\n";
        assert_eq!(
            merger.merge_block(&block(current, Some(base), incoming)).as_deref(),
            Some(incoming)
        );
    }

    #[test]
    fn test_equivalent_changes_merge_to_current() {
        let merger = SemanticMerger::new();
        let base = "y = 1\n";
        let current = "y = compute('a')\n";
        let incoming = "y = compute(\"a\")\n";
        assert_eq!(
            merger.merge_block(&block(current, Some(base), incoming)).as_deref(),
            Some(current)
        );
    }

    #[test]
    fn test_divergent_changes_do_not_merge() {
        let merger = SemanticMerger::new();
        assert!(merger
            .merge_block(&block("return 1\n", Some("return 0\n"), "return 2\n"))
            .is_none());
        assert!(merger
            .merge_block(&block("    return 1\n", None, "    return 2\n"))
            .is_none());
    }

    #[test]
    fn test_add_add_equivalent() {
        let merger = SemanticMerger::new();
        assert_eq!(
            merger
                .merge_block(&block("z = [1,2]\n", None, "z = [1, 2]\n"))
                .as_deref(),
            Some("z = [1,2]\n")
        );
        assert!(!merger.can_merge_all(&[]));
    }

    /// `name = value`, spaced or tight around `=`.
    fn assignment(name: &str, value: u32, spaced: bool) -> String {
        if spaced {
            format!("{} = {}\n", name, value)
        } else {
            format!("{}={}\n", name, value)
        }
    }

    proptest! {
        #[test]
        fn prop_unchanged_side_yields_other(
            name in "v_[a-z]{0,5}",
            base in 0u32..20,
            other in 0u32..20,
            spaced in any::<bool>(),
        ) {
            let merger = SemanticMerger::new();
            let base_text = assignment(&name, base, true);
            let other_text = assignment(&name, other, spaced);

            let taken = merger.merge_block(&block(&base_text, Some(&base_text), &other_text));
            prop_assert_eq!(taken.as_deref(), Some(other_text.as_str()));
            let kept = merger.merge_block(&block(&other_text, Some(&base_text), &base_text));
            prop_assert_eq!(kept.as_deref(), Some(other_text.as_str()));
        }

        #[test]
        fn prop_reformatted_side_loses_to_real_change(
            name in "v_[a-z]{0,5}",
            base in 0u32..20,
            change in 20u32..40,
            current_spaced in any::<bool>(),
            incoming_spaced in any::<bool>(),
        ) {
            let merger = SemanticMerger::new();
            let base_text = assignment(&name, base, true);
            let current = assignment(&name, base, current_spaced);
            let incoming = assignment(&name, change, incoming_spaced);
            let merged = merger.merge_block(&block(&current, Some(&base_text), &incoming));
            prop_assert_eq!(merged.as_deref(), Some(incoming.as_str()));
        }

        #[test]
        fn prop_both_changed_merges_only_when_equivalent(
            name in "v_[a-z]{0,5}",
            base in 0u32..20,
            current_value in 20u32..30,
            incoming_value in 20u32..30,
            current_spaced in any::<bool>(),
            incoming_spaced in any::<bool>(),
            with_base in any::<bool>(),
        ) {
            let merger = SemanticMerger::new();
            let base_text = assignment(&name, base, true);
            let current = assignment(&name, current_value, current_spaced);
            let incoming = assignment(&name, incoming_value, incoming_spaced);
            let base_content = with_base.then_some(base_text.as_str());

            let merged = merger.merge_block(&block(&current, base_content, &incoming));
            if current_value == incoming_value {
                prop_assert_eq!(merged.as_deref(), Some(current.as_str()));
            } else {
                prop_assert!(merged.is_none());
            }
        }
    }
}
