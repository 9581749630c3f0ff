//! Generic utility primitives with zero domain knowledge.
//!
//! - `command` - Process execution with output capture
//! - `shell` - Shell escaping, quoting and word splitting

pub mod command;
pub mod shell;
