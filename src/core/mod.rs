// Public modules
pub mod context;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod expansions;
pub mod hooks;
pub mod plan;
pub mod results;
pub mod run;
pub mod validate;

// Public modules for CLI access
pub mod defaults;
pub mod paths;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
