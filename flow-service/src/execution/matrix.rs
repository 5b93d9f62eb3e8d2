// Matrix Expansion
// Expands a flow's matrix declaration into concrete parameter bindings

use crate::execution::environment::Environment;

use serde::Serialize;
use std::fmt;

/// A single matrix combination: one value per declared parameter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Binding {
    values: Vec<(String, String)>,
}

impl Binding {
    /// Binding with no parameters (used by flows without a matrix)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a binding from `(param, value)` pairs, keeping their order
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value bound to a parameter
    pub fn get(&self, param: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| name == param)
            .map(|(_, value)| value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn with(&self, param: &str, value: &str) -> Self {
        let mut values = self.values.clone();
        values.push((param.to_string(), value.to_string()));
        Self { values }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .values
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Matrix expander for flows
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand a matrix declaration into its cartesian product.
    ///
    /// `matrix` pairs a local parameter name with the environment variable
    /// whose values it iterates. Parameters vary in declaration order with the
    /// last one varying fastest. An empty matrix yields one empty binding; a
    /// variable with no values yields no bindings at all.
    pub fn expand(matrix: &[(String, String)], env: &Environment) -> Vec<Binding> {
        let mut bindings = vec![Binding::empty()];

        for (param, variable) in matrix {
            let values = env.all(variable);
            bindings = bindings
                .iter()
                .flat_map(|binding| values.iter().map(move |value| binding.with(param, value)))
                .collect();

            if bindings.is_empty() {
                break;
            }
        }

        bindings
    }

    /// Number of bindings `expand` would produce
    pub fn cardinality(matrix: &[(String, String)], env: &Environment) -> usize {
        matrix
            .iter()
            .map(|(_, variable)| env.all(variable).len())
            .product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(p, v)| (p.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_no_matrix_yields_single_empty_binding() {
        let env = Environment::new();
        let bindings = MatrixExpander::expand(&[], &env);
        assert_eq!(bindings, vec![Binding::empty()]);
        assert_eq!(MatrixExpander::cardinality(&[], &env), 1);
    }

    #[test]
    fn test_single_parameter() {
        let env = Environment::new();
        env.set("platformimages", ["tsuru/go", "tsuru/python"]);

        let bindings = MatrixExpander::expand(&matrix(&[("platimg", "platformimages")]), &env);
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].get("platimg"), Some("tsuru/go"));
        assert_eq!(bindings[1].get("platimg"), Some("tsuru/python"));
    }

    #[test]
    fn test_cartesian_product_order() {
        let env = Environment::new();
        env.set("poolnames", ["ipool-docker", "ipool-swarm"]);
        env.set("platforms", ["iplat-go", "iplat-python", "iplat-ruby"]);

        let m = matrix(&[("pool", "poolnames"), ("plat", "platforms")]);
        let bindings = MatrixExpander::expand(&m, &env);

        assert_eq!(bindings.len(), 6);
        assert_eq!(MatrixExpander::cardinality(&m, &env), 6);
        let rendered: Vec<String> = bindings.iter().map(|b| b.to_string()).collect();
        assert_eq!(rendered[0], "pool=ipool-docker, plat=iplat-go");
        assert_eq!(rendered[2], "pool=ipool-docker, plat=iplat-ruby");
        assert_eq!(rendered[3], "pool=ipool-swarm, plat=iplat-go");
    }

    #[test]
    fn test_empty_variable_yields_no_bindings() {
        let env = Environment::new();
        env.set("poolnames", ["ipool-docker"]);

        let m = matrix(&[("pool", "poolnames"), ("plat", "platforms")]);
        assert!(MatrixExpander::expand(&m, &env).is_empty());
        assert_eq!(MatrixExpander::cardinality(&m, &env), 0);
    }

    #[test]
    fn test_binding_lookup() {
        let binding = Binding::from_pairs([("node", "10.0.0.1")]);
        assert_eq!(binding.get("node"), Some("10.0.0.1"));
        assert_eq!(binding.get("other"), None);
        assert!(!binding.is_empty());
        assert!(Binding::empty().is_empty());
    }
}
