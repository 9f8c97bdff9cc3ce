//! Schema module - Configuration and input types for optimization runs.

mod bounds;
mod builtin;
mod config;
mod method;

pub use bounds::*;
pub use builtin::*;
pub use config::*;
pub use method::*;
