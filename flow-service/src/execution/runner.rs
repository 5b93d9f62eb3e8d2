// Flow Runner
// Runs the static flow sequence and unwinds executed flows in reverse order

use crate::error::{FlowError, FlowResult};
use crate::execution::environment::Environment;
use crate::execution::events::{EventSender, FlowEvent, ProgressSender};
use crate::execution::flow::{Action, Flow, Scope};
use crate::execution::matrix::{Binding, MatrixExpander};
use crate::execution::retry::DEFAULT_POLL_INTERVAL;
use crate::testing::assertions::{CheckFailure, Checker, Checks, Phase};

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// Outcome of one flow in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    /// Everything the flow provides was already set
    Skipped,
    Completed,
    Failed,
}

/// Per-flow summary of a run
#[derive(Debug, Clone, Serialize)]
pub struct FlowReport {
    pub name: String,
    pub status: FlowStatus,
    /// Forward bindings that were started
    pub bindings: usize,
    pub parallel: bool,
    /// Whether a backward action ran during teardown
    pub rolled_back: bool,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Result of a complete run, teardown included
#[derive(Debug, Clone)]
pub struct RunReport {
    pub flows: Vec<FlowReport>,
    /// Error that stopped the forward phase
    pub forward_error: Option<FlowError>,
    /// Non-fatal checks that failed while running forward
    pub check_failures: Vec<CheckFailure>,
    /// Backward actions and rollback checks that failed
    pub rollback_failures: Vec<CheckFailure>,
    pub duration: Duration,
    /// Environment contents after teardown
    pub variables: BTreeMap<String, Vec<String>>,
}

impl RunReport {
    /// No forward error and no recorded failures in either phase
    pub fn success(&self) -> bool {
        self.forward_error.is_none()
            && self.check_failures.is_empty()
            && self.rollback_failures.is_empty()
    }

    pub fn executed(&self) -> impl Iterator<Item = &FlowReport> {
        self.flows.iter().filter(|f| f.status != FlowStatus::Skipped)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &FlowReport> {
        self.flows.iter().filter(|f| f.status == FlowStatus::Skipped)
    }

    /// Collapse the report into a single error, forward errors first
    pub fn into_result(self) -> FlowResult<()> {
        if let Some(err) = self.forward_error {
            return Err(err);
        }
        if !self.rollback_failures.is_empty() {
            return Err(FlowError::RollbackFailed {
                count: self.rollback_failures.len(),
            });
        }
        if !self.check_failures.is_empty() {
            return Err(FlowError::ChecksFailed {
                count: self.check_failures.len(),
            });
        }
        Ok(())
    }
}

/// Configuration for flow execution
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Interval between probes of `Scope::wait_for`
    pub poll_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Teardown obligation registered once a flow's forward action has run
#[derive(Debug)]
struct ExecutedFlow {
    /// Position in the flow sequence
    index: usize,
    /// Position in the run's flow reports
    report: usize,
    /// Bindings whose forward action was started
    bindings: Vec<Binding>,
}

/// Runs a fixed flow sequence against an environment
pub struct FlowRunner {
    flows: Vec<Flow>,
    config: RunnerConfig,
    event_tx: Option<ProgressSender>,
}

impl FlowRunner {
    /// Create a runner for a flow sequence
    pub fn new(flows: Vec<Flow>) -> Self {
        Self {
            flows,
            config: RunnerConfig::default(),
            event_tx: None,
        }
    }

    /// Set runner configuration
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    /// Run every flow in order, then roll back the executed ones in reverse.
    ///
    /// Teardown runs whether the forward phase finished, failed a check, or
    /// an action panicked.
    pub async fn run(&self, env: &Environment) -> RunReport {
        let start = Instant::now();
        let checks = Checks::with_progress(self.event_tx.clone());
        let mut executed = Vec::new();
        let mut reports = Vec::new();

        self.event_tx.send_event(FlowEvent::RunStarted {
            total_flows: self.flows.len(),
        });
        info!(total_flows = self.flows.len(), "run started");

        let forward_error = self
            .run_forward(env, &checks, &mut executed, &mut reports)
            .await
            .err();
        if let Some(err) = &forward_error {
            warn!(error = %err, "forward phase aborted");
        }

        let check_failures = checks.drain_phase(Phase::Forward);
        let rollback_failures = self.unwind(env, &checks, executed, &mut reports).await;

        let report = RunReport {
            flows: reports,
            forward_error,
            check_failures,
            rollback_failures,
            duration: start.elapsed(),
            variables: env.snapshot(),
        };

        self.event_tx.send_event(FlowEvent::RunCompleted {
            success: report.success(),
            executed: report.executed().count(),
            skipped: report.skipped().count(),
            rollback_failures: report.rollback_failures.len(),
            duration: report.duration,
        });
        info!(
            success = report.success(),
            duration = ?report.duration,
            "run completed"
        );

        report
    }

    async fn run_forward(
        &self,
        env: &Environment,
        checks: &Checks,
        executed: &mut Vec<ExecutedFlow>,
        reports: &mut Vec<FlowReport>,
    ) -> FlowResult<()> {
        for (index, flow) in self.flows.iter().enumerate() {
            if flow.is_satisfied(env) {
                debug!(flow = %flow.name, provides = ?flow.provides, "flow skipped");
                self.event_tx.send_event(FlowEvent::FlowSkipped {
                    flow: flow.name.clone(),
                    provides: flow.provides.clone(),
                });
                reports.push(FlowReport {
                    name: flow.name.clone(),
                    status: FlowStatus::Skipped,
                    bindings: 0,
                    parallel: flow.parallel,
                    rolled_back: false,
                    error: None,
                    duration: Duration::ZERO,
                });
                continue;
            }

            let missing = flow.missing_requirements(env);
            if !missing.is_empty() {
                debug!(flow = %flow.name, ?missing, "required variables not set");
            }

            let start = Instant::now();
            let bindings = MatrixExpander::expand(&flow.matrix, env);
            info!(
                flow = %flow.name,
                bindings = bindings.len(),
                parallel = flow.parallel,
                "flow started"
            );
            self.event_tx.send_event(FlowEvent::flow_started(
                &flow.name,
                bindings.len(),
                flow.parallel,
            ));

            let (attempted, result) = if flow.parallel {
                self.run_parallel(flow, bindings, env, checks).await
            } else {
                self.run_sequential(flow, bindings, env, checks).await
            };

            let duration = start.elapsed();
            let success = result.is_ok();
            self.event_tx
                .send_event(FlowEvent::flow_completed(&flow.name, success, duration));
            if success {
                info!(flow = %flow.name, ?duration, "flow completed");
            } else {
                warn!(flow = %flow.name, ?duration, "flow failed");
            }

            executed.push(ExecutedFlow {
                index,
                report: reports.len(),
                bindings: attempted.clone(),
            });
            reports.push(FlowReport {
                name: flow.name.clone(),
                status: if success {
                    FlowStatus::Completed
                } else {
                    FlowStatus::Failed
                },
                bindings: attempted.len(),
                parallel: flow.parallel,
                rolled_back: false,
                error: result.as_ref().err().map(ToString::to_string),
                duration,
            });

            result?;
        }

        Ok(())
    }

    /// Run bindings one after another, stopping at the first failure
    async fn run_sequential(
        &self,
        flow: &Flow,
        bindings: Vec<Binding>,
        env: &Environment,
        checks: &Checks,
    ) -> (Vec<Binding>, FlowResult<()>) {
        let mut attempted = Vec::with_capacity(bindings.len());

        for binding in bindings {
            attempted.push(binding.clone());
            let start = Instant::now();
            let result = self
                .run_action(flow, &flow.forward, binding.clone(), env, checks, Phase::Forward)
                .await;
            self.event_tx.send_event(FlowEvent::binding_completed(
                &flow.name,
                binding.to_string(),
                result.as_ref().err().map(ToString::to_string),
                start.elapsed(),
            ));
            if result.is_err() {
                return (attempted, result);
            }
        }

        (attempted, Ok(()))
    }

    /// Launch every binding at once and wait for all of them.
    ///
    /// A failing binding does not cancel its siblings; the first error in
    /// binding order is reported.
    async fn run_parallel(
        &self,
        flow: &Flow,
        bindings: Vec<Binding>,
        env: &Environment,
        checks: &Checks,
    ) -> (Vec<Binding>, FlowResult<()>) {
        let start = Instant::now();
        let handles: Vec<_> = bindings
            .iter()
            .map(|binding| {
                let task = self.spawn_action(
                    flow,
                    &flow.forward,
                    binding.clone(),
                    env,
                    checks,
                    Phase::Forward,
                );
                (binding.clone(), task)
            })
            .collect();

        let mut outcome = Ok(());
        for (binding, handle) in handles {
            let result = join_action(&flow.name, handle.await);
            self.event_tx.send_event(FlowEvent::binding_completed(
                &flow.name,
                binding.to_string(),
                result.as_ref().err().map(ToString::to_string),
                start.elapsed(),
            ));
            if let Err(err) = result {
                warn!(flow = %flow.name, binding = %binding, error = %err, "binding failed");
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
        }

        (bindings, outcome)
    }

    /// Invoke backward actions of executed flows, newest first, one at a time.
    /// Every obligation is attempted; failures are collected, never raised.
    async fn unwind(
        &self,
        env: &Environment,
        checks: &Checks,
        executed: Vec<ExecutedFlow>,
        reports: &mut [FlowReport],
    ) -> Vec<CheckFailure> {
        self.event_tx.send_event(FlowEvent::RollbackStarted {
            total_flows: executed.len(),
        });

        for record in executed.into_iter().rev() {
            let flow = &self.flows[record.index];
            let Some(backward) = &flow.backward else {
                continue;
            };

            info!(flow = %flow.name, bindings = record.bindings.len(), "rolling back flow");
            for binding in record.bindings.iter().rev() {
                let result = self
                    .run_action(flow, backward, binding.clone(), env, checks, Phase::Rollback)
                    .await;
                if let Err(err) = &result {
                    checks.record(CheckFailure {
                        flow: flow.name.clone(),
                        binding: binding.to_string(),
                        phase: Phase::Rollback,
                        message: err.to_string(),
                    });
                }
                self.event_tx.send_event(FlowEvent::rollback_completed(
                    &flow.name,
                    binding.to_string(),
                    result.err().map(|e| e.to_string()),
                ));
            }

            if let Some(report) = reports.get_mut(record.report) {
                report.rolled_back = true;
            }
        }

        checks.drain_phase(Phase::Rollback)
    }

    async fn run_action(
        &self,
        flow: &Flow,
        action: &Arc<dyn Action>,
        binding: Binding,
        env: &Environment,
        checks: &Checks,
        phase: Phase,
    ) -> FlowResult<()> {
        let handle = self.spawn_action(flow, action, binding, env, checks, phase);
        join_action(&flow.name, handle.await)
    }

    /// Run an action on its own task so a panic surfaces as an error
    fn spawn_action(
        &self,
        flow: &Flow,
        action: &Arc<dyn Action>,
        binding: Binding,
        env: &Environment,
        checks: &Checks,
        phase: Phase,
    ) -> tokio::task::JoinHandle<FlowResult<()>> {
        let checker = Checker::new(flow.name.clone(), binding.clone(), phase, checks.clone());
        let scope = Scope::new(env.with_binding(&binding), binding, checker)
            .with_poll_interval(self.config.poll_interval);
        let action = Arc::clone(action);
        tokio::spawn(async move { action.run(scope).await })
    }
}

fn join_action(flow: &str, joined: Result<FlowResult<()>, JoinError>) -> FlowResult<()> {
    match joined {
        Ok(result) => result,
        Err(err) => Err(FlowError::Panicked {
            flow: flow.to_string(),
            message: panic_message(err),
        }),
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "task cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
