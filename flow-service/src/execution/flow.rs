// Flow Definitions
// Declarative units of work with a dependency gate, matrix, and rollback

use crate::error::{FlowError, FlowResult};
use crate::execution::environment::Environment;
use crate::execution::matrix::Binding;
use crate::execution::retry::retry_every;
use crate::runners::command::CommandResult;
use crate::testing::assertions::{Checker, Expect};

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Forward or backward action of a flow
#[async_trait::async_trait]
pub trait Action: Send + Sync {
    /// Run the action for one matrix binding
    async fn run(&self, scope: Scope) -> FlowResult<()>;
}

#[async_trait::async_trait]
impl<F, Fut> Action for F
where
    F: Fn(Scope) -> Fut + Send + Sync,
    Fut: Future<Output = FlowResult<()>> + Send,
{
    async fn run(&self, scope: Scope) -> FlowResult<()> {
        (self)(scope).await
    }
}

/// Everything an action can see while it runs: the environment (with its
/// matrix binding exposed), the binding itself, and the run's checks
#[derive(Debug, Clone)]
pub struct Scope {
    env: Environment,
    binding: Binding,
    checker: Checker,
    poll_interval: Duration,
}

impl Scope {
    pub fn new(env: Environment, binding: Binding, checker: Checker) -> Self {
        Self {
            env,
            binding,
            checker,
            poll_interval: crate::execution::retry::DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the interval used by [`Scope::wait_for`]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Value bound to a matrix parameter, or empty when unbound
    pub fn param(&self, name: &str) -> String {
        self.binding.get(name).unwrap_or_default().to_string()
    }

    /// Fatal: fail the action unless the result meets the expectation
    pub fn assert(&self, result: &CommandResult, expect: &Expect) -> FlowResult<()> {
        self.checker.assert(result, expect)
    }

    /// Fatal: fail the action with `message` unless `condition` holds
    pub fn ensure(&self, condition: bool, message: impl Into<String>) -> FlowResult<()> {
        self.checker.ensure(condition, message)
    }

    /// Non-fatal: record a failure when the result misses the expectation
    pub fn check(&self, result: &CommandResult, expect: &Expect) -> bool {
        self.checker.check(result, expect)
    }

    /// Non-fatal: record `message` unless `condition` holds
    pub fn verify(&self, condition: bool, message: impl Into<String>) -> bool {
        self.checker.verify(condition, message)
    }

    /// Poll `probe` until it succeeds; a deadline miss is a fatal failure
    pub async fn wait_for<F, Fut>(&self, deadline: Duration, what: &str, probe: F) -> FlowResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        if retry_every(self.poll_interval, deadline, probe).await {
            Ok(())
        } else {
            Err(FlowError::Timeout {
                what: what.to_string(),
                deadline,
            })
        }
    }
}

/// A declared unit of work
#[derive(Clone)]
pub struct Flow {
    pub name: String,
    /// Variables guaranteed to be set after a successful forward run
    pub provides: Vec<String>,
    /// Variables the flow reads; informational only
    pub requires: Vec<String>,
    /// `(parameter, variable)` pairs, in declaration order
    pub matrix: Vec<(String, String)>,
    /// Run matrix bindings concurrently
    pub parallel: bool,
    pub forward: Arc<dyn Action>,
    pub backward: Option<Arc<dyn Action>>,
}

impl Flow {
    /// Create a flow with a forward action
    pub fn new(name: impl Into<String>, forward: impl Action + 'static) -> Self {
        Self {
            name: name.into(),
            provides: Vec::new(),
            requires: Vec::new(),
            matrix: Vec::new(),
            parallel: false,
            forward: Arc::new(forward),
            backward: None,
        }
    }

    pub fn provides<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provides.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn requires<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires.extend(names.into_iter().map(Into::into));
        self
    }

    /// Iterate `variable`'s values, exposing each as `param`
    pub fn matrix(mut self, param: impl Into<String>, variable: impl Into<String>) -> Self {
        self.matrix.push((param.into(), variable.into()));
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn backward(mut self, backward: impl Action + 'static) -> Self {
        self.backward = Some(Arc::new(backward));
        self
    }

    /// Whether every provided variable already holds a value.
    /// Flows that provide nothing are never satisfied.
    pub fn is_satisfied(&self, env: &Environment) -> bool {
        !self.provides.is_empty() && self.provides.iter().all(|name| env.is_populated(name))
    }

    /// Required variables that are not set
    pub fn missing_requirements(&self, env: &Environment) -> Vec<String> {
        self.requires
            .iter()
            .filter(|name| !env.has(name))
            .cloned()
            .collect()
    }

    pub fn has_rollback(&self) -> bool {
        self.backward.is_some()
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("provides", &self.provides)
            .field("requires", &self.requires)
            .field("matrix", &self.matrix)
            .field("parallel", &self.parallel)
            .field("backward", &self.backward.is_some())
            .finish()
    }
}
