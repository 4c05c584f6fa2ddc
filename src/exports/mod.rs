//! Cross-stack exports and the stacks importing them.

mod resolver;

pub use resolver::{DEFAULT_CONCURRENCY, Export, ExportResolver};
