//! Git subprocess layer: repository operations and linked worktrees.

pub mod repository;
pub mod worktree;

pub use repository::{GitOutput, MergeTreeOutput, RepositoryOperations};
pub use worktree::{Worktree, WorktreeInfo, WorktreeManager};
