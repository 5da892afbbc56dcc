//! Plan construction and execution.

pub mod auto_resolver;
pub mod executor;
pub mod fs;

pub use auto_resolver::AutoResolver;
pub use executor::{ExecutionOutcome, ResolutionExecutor};
