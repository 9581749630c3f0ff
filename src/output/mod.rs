//! CLI output: response envelope (JSON or YAML) and exit codes.

mod response;

pub use response::*;
