// Scenario Configuration
// Loads the installer scenario settings and seeds the run environment

use crate::error::ConfigError;
use crate::execution::environment::{Environment, DEFAULT_ENV_PREFIX};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "flowrun.yml";

/// Platform images installed when none are configured
pub const DEFAULT_PLATFORMS: &[&str] = &[
    "tsuru/python",
    "tsuru/go",
    "tsuru/buildpack",
    "tsuru/cordova",
    "tsuru/elixir",
    "tsuru/java",
    "tsuru/nodejs",
    "tsuru/php",
    "tsuru/play",
    "tsuru/pypy",
    "tsuru/python3",
    "tsuru/ruby",
    "tsuru/static",
];

/// Provisioners that get a pool and a node each
pub const DEFAULT_PROVISIONERS: &[&str] = &["docker", "swarm"];

/// Settings for the installer scenario (YAML).
///
/// Every field is optional; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Platform CLI binary
    pub cli: String,

    /// Platform images to add
    pub platforms: Vec<String>,

    /// Provisioners to create pools for
    pub provisioners: Vec<String>,

    /// Installer configuration text; derived from the provisioners when unset
    pub installer_config: Option<String>,

    /// Interval between readiness probes
    pub poll_interval_secs: u64,

    /// Limit for `install-create`
    pub install_timeout_secs: u64,

    /// Limit for each `platform-add`
    pub platform_timeout_secs: u64,

    /// Wait for nodes and apps to report ready
    pub ready_timeout_secs: u64,

    /// Wait for a deployed app to answer HTTP requests
    pub app_timeout_secs: u64,

    /// Initial variables, by name
    pub vars: BTreeMap<String, Vec<String>>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            cli: "tsuru".to_string(),
            platforms: DEFAULT_PLATFORMS.iter().map(|p| p.to_string()).collect(),
            provisioners: DEFAULT_PROVISIONERS.iter().map(|p| p.to_string()).collect(),
            installer_config: None,
            poll_interval_secs: 5,
            install_timeout_secs: 60 * 60,
            platform_timeout_secs: 15 * 60,
            ready_timeout_secs: 60,
            app_timeout_secs: 15 * 60,
            vars: BTreeMap::new(),
        }
    }
}

impl ScenarioConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cli.trim().is_empty() {
            return Err(ConfigError::Invalid("cli must not be empty".to_string()));
        }
        if self.provisioners.is_empty() {
            return Err(ConfigError::Invalid(
                "provisioners must list at least one provisioner".to_string(),
            ));
        }
        if let Some(bad) = self.platforms.iter().find(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "platform image '{}' is empty",
                bad
            )));
        }
        for (field, value) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("install_timeout_secs", self.install_timeout_secs),
            ("platform_timeout_secs", self.platform_timeout_secs),
            ("ready_timeout_secs", self.ready_timeout_secs),
            ("app_timeout_secs", self.app_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be > 0", field)));
            }
        }
        Ok(())
    }

    /// Installer configuration, one app host per provisioner unless overridden
    pub fn installer_config_text(&self) -> String {
        if let Some(text) = &self.installer_config {
            return text.clone();
        }
        format!(
            "driver:
  name: virtualbox
  options:
    virtualbox-cpu-count: 2
    virtualbox-memory: 2048
docker-flags:
  - experimental
hosts:
  apps:
    size: {}
components:
  install-dashboard: false
",
            self.provisioners.len()
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn platform_timeout(&self) -> Duration {
        Duration::from_secs(self.platform_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn app_timeout(&self) -> Duration {
        Duration::from_secs(self.app_timeout_secs)
    }

    /// Locate the configured CLI on `PATH`
    pub fn find_cli(&self) -> Result<PathBuf, ConfigError> {
        which::which(&self.cli)
            .map_err(|e| ConfigError::Invalid(format!("cli '{}' not found: {}", self.cli, e)))
    }

    /// Build the run environment.
    ///
    /// Layers, later ones replacing earlier values of the same name: process
    /// variables prefixed with `INTEGRATION_`, then `vars`, then `overrides`.
    /// Repeated override names accumulate their values.
    pub fn seed_environment(&self, overrides: &[(String, String)]) -> Environment {
        let env = Environment::from_process_env(DEFAULT_ENV_PREFIX);
        for (name, values) in &self.vars {
            env.set(name.clone(), values.iter().cloned());
        }

        let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, value) in overrides {
            grouped.entry(name.as_str()).or_default().push(value.as_str());
        }
        for (name, values) in grouped {
            env.set(name, values);
        }

        debug!(variables = env.snapshot().len(), "environment seeded");
        env
    }
}

/// Load config from a YAML file.
///
/// If the file is missing, returns `ScenarioConfig::default()`.
pub fn load_config(path: &Path) -> Result<ScenarioConfig, ConfigError> {
    if !path.exists() {
        debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(ScenarioConfig::default());
    }

    let content = fs::read_to_string(path)?;
    let config: ScenarioConfig = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}
