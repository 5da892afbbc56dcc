//! Resolution strategy generation.

pub mod ai;
pub mod generator;

pub use ai::{CompletionService, HttpCompletionService};
pub use generator::{StrategyGenerator, StrategySource};
