// Flow Environment
// Shared multi-valued variable store and `{{.name}}` template resolution

use crate::execution::matrix::Binding;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Prefix used when seeding variables from the process environment
pub const DEFAULT_ENV_PREFIX: &str = "INTEGRATION_";

type Store = HashMap<String, Vec<String>>;

/// Variable store shared by every flow and matrix binding of a run.
///
/// Cloning returns another handle onto the same store. A handle created with
/// [`Environment::with_binding`] additionally sees its matrix binding, which
/// shadows stored variables of the same name for reads only.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    store: Arc<RwLock<Store>>,
    overlay: Arc<Binding>,
}

impl Environment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an environment from `(name, value)` pairs; repeated names append
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env = Self::new();
        for (name, value) in vars {
            env.add(name, [value]);
        }
        env
    }

    /// Seed an environment from process variables named `<prefix><name>`
    pub fn from_process_env(prefix: &str) -> Self {
        Self::from_vars(std::env::vars().filter_map(|(key, value)| {
            key.strip_prefix(prefix)
                .filter(|name| !name.is_empty())
                .map(|name| (name.to_string(), value))
        }))
    }

    /// Return a handle that also exposes the given matrix binding
    pub fn with_binding(&self, binding: &Binding) -> Self {
        Self {
            store: Arc::clone(&self.store),
            overlay: Arc::new(binding.clone()),
        }
    }

    /// First value of a variable, or an empty string when unset
    pub fn get(&self, name: &str) -> String {
        if let Some(value) = self.overlay.get(name) {
            return value.to_string();
        }
        self.read()
            .get(name)
            .and_then(|values| values.first().cloned())
            .unwrap_or_default()
    }

    /// Every value of a variable, in insertion order
    pub fn all(&self, name: &str) -> Vec<String> {
        if let Some(value) = self.overlay.get(name) {
            return vec![value.to_string()];
        }
        self.read().get(name).cloned().unwrap_or_default()
    }

    /// Whether the variable holds at least one value
    pub fn has(&self, name: &str) -> bool {
        if self.overlay.get(name).is_some() {
            return true;
        }
        self.read().get(name).is_some_and(|values| !values.is_empty())
    }

    /// Whether the variable's first value is non-empty
    pub fn is_populated(&self, name: &str) -> bool {
        !self.get(name).is_empty()
    }

    /// Replace the values of a variable
    pub fn set<I, V>(&self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        self.write().insert(name.into(), values);
    }

    /// Append values to a variable, creating it when absent
    pub fn add<I, V>(&self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        self.write().entry(name.into()).or_default().extend(values);
    }

    /// Substitute every `{{.name}}` placeholder with `get(name)`.
    ///
    /// Unknown names resolve to an empty string; an unterminated `{{` is kept
    /// as literal text.
    pub fn resolve(&self, template: &str) -> String {
        if !template.contains("{{") {
            return template.to_string();
        }

        let mut result = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            result.push_str(&rest[..start]);
            let after_open = &rest[start + 2..];

            let Some(end) = after_open.find("}}") else {
                result.push_str(&rest[start..]);
                return result;
            };

            let token = after_open[..end].trim();
            match token.strip_prefix('.') {
                Some(name) => result.push_str(&self.get(name.trim())),
                None => {
                    // Not a variable reference; keep it verbatim
                    result.push_str(&rest[start..start + 2 + end + 2]);
                }
            }
            rest = &after_open[end + 2..];
        }

        result.push_str(rest);
        result
    }

    /// Sorted copy of every stored variable (bindings excluded)
    pub fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.read()
            .iter()
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }
}
