// Flow Service Library
// Core engine for ordered, rollback-safe integration flows driving external CLIs

pub mod config;
pub mod error;
pub mod execution;
pub mod runners;
pub mod scenario;
pub mod testing;

// Re-export commonly used types
pub use error::{ConfigError, ExtractError, FlowError, FlowResult};

// Re-export configuration
pub use config::{load_config, ScenarioConfig, DEFAULT_CONFIG_FILE};

// Re-export execution types
pub use execution::{
    progress_channel, Action, Binding, Environment, Flow, FlowEvent, FlowReport, FlowRunner,
    FlowStatus, MatrixExpander, ProgressReceiver, ProgressSender, RunReport, RunnerConfig, Scope,
};

// Re-export runner types
pub use runners::{Command, CommandResult, SENTINEL_EXIT_CODE};

// Re-export check and reporting types
pub use testing::{CheckFailure, Checks, Expect, Phase, ReportFormat, RunReporter};

// Re-export scenario entry points
pub use scenario::{installer_flows, scenario_enabled, select_cluster_managers, ClusterManager};
