//! Conflict detection, marker scanning and block-level merging.
//!
//! 1. **Detection** -- asking git which files conflict between two refs.
//! 2. **Scanning** -- turning merged text into [`ConflictBlock`]s.
//! 3. **Merging** -- resolving blocks whose sides are reconcilable.
//!
//! [`ConflictBlock`]: crate::models::ConflictBlock

pub mod detector;
pub mod markers;
pub mod merger;

pub use detector::{ConflictDetection, GitConflictDetector};
pub use markers::{parse_conflict_blocks, wrap_conflict};
pub use merger::SemanticMerger;
