// Execution Engine Module
// Handles the shared environment, matrix expansion, flow definitions, and run orchestration

pub mod environment;
pub mod events;
pub mod flow;
pub mod matrix;
pub mod retry;
pub mod runner;

// Re-export key types
pub use environment::Environment;
pub use events::{progress_channel, FlowEvent, ProgressReceiver, ProgressSender};
pub use flow::{Action, Flow, Scope};
pub use matrix::{Binding, MatrixExpander};
pub use retry::{retry, retry_every, DEFAULT_POLL_INTERVAL};
pub use runner::{FlowReport, FlowRunner, FlowStatus, RunReport, RunnerConfig};
