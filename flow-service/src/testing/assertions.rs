// Check Logic
// Fatal and non-fatal verification of command results

use crate::error::{FlowError, FlowResult};
use crate::execution::events::{EventSender, FlowEvent, ProgressSender};
use crate::execution::matrix::Binding;
use crate::runners::command::CommandResult;

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

// =============================================================================
// Expectations
// =============================================================================

/// What a command result is expected to look like
#[derive(Debug, Clone)]
pub enum Expect {
    /// Exit code zero
    Ok,
    /// Stdout matches the pattern
    Matches(Regex),
}

impl Expect {
    /// Compile a stdout pattern expectation
    pub fn matches(pattern: &str) -> FlowResult<Self> {
        Regex::new(pattern)
            .map(Expect::Matches)
            .map_err(|e| FlowError::check(format!("invalid pattern '{}': {}", pattern, e)))
    }

    /// Whether the result satisfies the expectation
    pub fn accepts(&self, result: &CommandResult) -> bool {
        match self {
            Expect::Ok => result.ok(),
            Expect::Matches(pattern) => result.matches(pattern),
        }
    }

    /// Failure message for a rejected result
    pub fn describe_failure(&self, result: &CommandResult) -> String {
        format!("expected {}, got:\n{}", self, result)
    }
}

impl fmt::Display for Expect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expect::Ok => write!(f, "exit code 0"),
            Expect::Matches(pattern) => write!(f, "stdout matching \"{}\"", pattern),
        }
    }
}

// =============================================================================
// Recorded failures
// =============================================================================

/// Whether a failure happened while running forward or while rolling back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Forward,
    Rollback,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Forward => write!(f, "forward"),
            Phase::Rollback => write!(f, "rollback"),
        }
    }
}

/// A non-fatal check that did not pass, or a rollback step that failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckFailure {
    pub flow: String,
    pub binding: String,
    pub phase: Phase,
    pub message: String,
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.phase, self.flow)?;
        if !self.binding.is_empty() {
            write!(f, " ({})", self.binding)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Collector of non-fatal failures, shared by every action of a run
#[derive(Debug, Clone, Default)]
pub struct Checks {
    failures: Arc<Mutex<Vec<CheckFailure>>>,
    event_tx: Option<ProgressSender>,
}

impl Checks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collector that also publishes each failure as a progress event
    pub fn with_progress(event_tx: Option<ProgressSender>) -> Self {
        Self {
            failures: Arc::default(),
            event_tx,
        }
    }

    /// Record a failure
    pub fn record(&self, failure: CheckFailure) {
        warn!(
            flow = %failure.flow,
            binding = %failure.binding,
            phase = %failure.phase,
            "{}",
            failure.message
        );
        self.event_tx.send_event(FlowEvent::CheckFailed {
            failure: failure.clone(),
        });
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }

    /// Copy of every recorded failure
    pub fn failures(&self) -> Vec<CheckFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return the failures recorded for one phase
    pub fn drain_phase(&self, phase: Phase) -> Vec<CheckFailure> {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let (taken, kept): (Vec<_>, Vec<_>) =
            failures.drain(..).partition(|f| f.phase == phase);
        *failures = kept;
        taken
    }

    pub fn is_empty(&self) -> bool {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

// =============================================================================
// Per-action checker
// =============================================================================

/// Check helpers bound to one flow binding and phase
#[derive(Debug, Clone)]
pub struct Checker {
    flow: String,
    binding: Binding,
    phase: Phase,
    checks: Checks,
}

impl Checker {
    pub fn new(flow: impl Into<String>, binding: Binding, phase: Phase, checks: Checks) -> Self {
        Self {
            flow: flow.into(),
            binding,
            phase,
            checks,
        }
    }

    /// Fatal check: reject the result with an error
    pub fn assert(&self, result: &CommandResult, expect: &Expect) -> FlowResult<()> {
        if expect.accepts(result) {
            Ok(())
        } else {
            Err(FlowError::check(expect.describe_failure(result)))
        }
    }

    /// Non-fatal check: record the failure and keep going
    pub fn check(&self, result: &CommandResult, expect: &Expect) -> bool {
        if expect.accepts(result) {
            return true;
        }
        self.fail(expect.describe_failure(result));
        false
    }

    /// Fatal boolean check
    pub fn ensure(&self, condition: bool, message: impl Into<String>) -> FlowResult<()> {
        if condition {
            Ok(())
        } else {
            Err(FlowError::check(message))
        }
    }

    /// Non-fatal boolean check
    pub fn verify(&self, condition: bool, message: impl Into<String>) -> bool {
        if !condition {
            self.fail(message.into());
        }
        condition
    }

    fn fail(&self, message: String) {
        self.checks.record(CheckFailure {
            flow: self.flow.clone(),
            binding: self.binding.to_string(),
            phase: self.phase,
            message,
        });
    }
}
