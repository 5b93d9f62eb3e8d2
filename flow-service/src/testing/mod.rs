// Testing Framework Module
// Provides fatal and non-fatal checks and run reporting

pub mod assertions;
pub mod reporter;

// Re-export key types
pub use assertions::{CheckFailure, Checker, Checks, Expect, Phase};
pub use reporter::{ReportFormat, RunReporter};
