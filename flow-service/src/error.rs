// Flow Errors
// Error types shared by the flow engine, checks, and scenario definitions

use std::time::Duration;
use thiserror::Error;

/// Result alias used by flow actions
pub type FlowResult<T> = Result<T, FlowError>;

/// Errors raised while running flows
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    /// A fatal check rejected a command result or condition
    #[error("check failed: {message}")]
    CheckFailed { message: String },

    /// A polling wait never observed success before its deadline
    #[error("{what} not ready after {deadline:?}")]
    Timeout { what: String, deadline: Duration },

    /// An action panicked while running inside its task
    #[error("flow '{flow}' panicked: {message}")]
    Panicked { flow: String, message: String },

    /// Local I/O needed by an action failed (temp files, reading output files)
    #[error("io error: {0}")]
    Io(String),

    /// Structured values could not be extracted from command output
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// One or more rollback steps failed
    #[error("{count} rollback step(s) failed")]
    RollbackFailed { count: usize },

    /// Non-fatal checks failed during forward execution
    #[error("{count} check(s) failed")]
    ChecksFailed { count: usize },
}

impl FlowError {
    /// Build a fatal check failure
    pub fn check(message: impl Into<String>) -> Self {
        FlowError::CheckFailed {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        FlowError::Io(err.to_string())
    }
}

/// Errors raised by output extraction
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    /// A required field was not present in the command output
    #[error("could not find {field} in command output")]
    MissingField { field: &'static str },

    /// A pattern built from command output did not compile
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("unknown cluster backend '{0}'")]
    UnknownCluster(String),
}
