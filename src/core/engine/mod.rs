//! Generic execution infrastructure.
//!
//! - `pipeline` - step ordering, skip/block gating, batch execution
//! - `executor` - built-in command execution (`shell.exec`, `subprocess.exec`, ...)
//!
//! The task runner in `run` builds its orchestration on these primitives.

pub mod executor;
pub mod pipeline;
