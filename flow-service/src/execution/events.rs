// Execution Events
// Progress reporting and event types for flow runs

use crate::testing::assertions::CheckFailure;

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<FlowEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<FlowEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during a run
#[derive(Debug, Clone)]
pub enum FlowEvent {
    /// Run started
    RunStarted { total_flows: usize },

    /// Flow skipped because everything it provides is already set
    FlowSkipped { flow: String, provides: Vec<String> },

    /// Flow started its forward bindings
    FlowStarted {
        flow: String,
        bindings: usize,
        parallel: bool,
    },

    /// One forward binding finished
    BindingCompleted {
        flow: String,
        binding: String,
        success: bool,
        error: Option<String>,
        duration: Duration,
    },

    /// Flow finished all of its forward bindings
    FlowCompleted {
        flow: String,
        success: bool,
        duration: Duration,
    },

    /// Teardown of executed flows started
    RollbackStarted { total_flows: usize },

    /// Backward action of one flow binding finished
    RollbackCompleted {
        flow: String,
        binding: String,
        success: bool,
        error: Option<String>,
    },

    /// A non-fatal check failed
    CheckFailed { failure: CheckFailure },

    /// Run completed, including teardown
    RunCompleted {
        success: bool,
        executed: usize,
        skipped: usize,
        rollback_failures: usize,
        duration: Duration,
    },
}

impl FlowEvent {
    pub fn flow_started(flow: &str, bindings: usize, parallel: bool) -> Self {
        FlowEvent::FlowStarted {
            flow: flow.to_string(),
            bindings,
            parallel,
        }
    }

    pub fn flow_completed(flow: &str, success: bool, duration: Duration) -> Self {
        FlowEvent::FlowCompleted {
            flow: flow.to_string(),
            success,
            duration,
        }
    }

    pub fn binding_completed(
        flow: &str,
        binding: String,
        error: Option<String>,
        duration: Duration,
    ) -> Self {
        FlowEvent::BindingCompleted {
            flow: flow.to_string(),
            binding,
            success: error.is_none(),
            error,
            duration,
        }
    }

    pub fn rollback_completed(flow: &str, binding: String, error: Option<String>) -> Self {
        FlowEvent::RollbackCompleted {
            flow: flow.to_string(),
            binding,
            success: error.is_none(),
            error,
        }
    }
}

/// Extension trait for optional progress senders
pub trait EventSender {
    fn send_event(&self, event: FlowEvent);
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: FlowEvent) {
        if let Some(tx) = self {
            // Receiver may have been dropped; progress is best-effort
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();

        tx.send(FlowEvent::RunStarted { total_flows: 3 }).unwrap();

        match rx.try_recv().unwrap() {
            FlowEvent::RunStarted { total_flows } => assert_eq!(total_flows, 3),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_send_event_without_sender() {
        let sender: Option<ProgressSender> = None;
        sender.send_event(FlowEvent::RunStarted { total_flows: 1 });
    }

    #[test]
    fn test_send_event_after_receiver_dropped() {
        let (tx, rx) = progress_channel();
        drop(rx);
        Some(tx).send_event(FlowEvent::RollbackStarted { total_flows: 0 });
    }

    #[test]
    fn test_binding_completed_success_flag() {
        match FlowEvent::binding_completed("team", String::new(), None, Duration::ZERO) {
            FlowEvent::BindingCompleted { success, .. } => assert!(success),
            other => panic!("unexpected event: {:?}", other),
        }
        match FlowEvent::rollback_completed("team", String::new(), Some("boom".into())) {
            FlowEvent::RollbackCompleted { success, error, .. } => {
                assert!(!success);
                assert_eq!(error.as_deref(), Some("boom"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
