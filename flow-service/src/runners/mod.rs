// Runners Module
// Provides external command execution

pub mod command;

// Re-export key types
pub use command::{Command, CommandResult, SENTINEL_EXIT_CODE};
