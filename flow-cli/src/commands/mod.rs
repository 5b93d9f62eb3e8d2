pub mod check;
pub mod list;
pub mod run;

use std::path::Path;

use color_eyre::Result;

use flow_service::{load_config, Environment, ScenarioConfig};

/// Load the scenario configuration, reporting where it came from
pub fn load(path: &Path) -> Result<ScenarioConfig> {
    let config = load_config(path)
        .map_err(|e| color_eyre::eyre::eyre!("{}: {}", path.display(), e))?;
    if path.exists() {
        crate::output::phase("Config", &format!("{}", path.display()));
    } else {
        crate::output::detail(&format!("  {} not found, using defaults", path.display()));
    }
    Ok(config)
}

/// Parse repeated `--var name=value` flags, keeping their order
pub fn parse_vars(raw: &[String]) -> Result<Vec<(String, String)>> {
    let mut vars = Vec::with_capacity(raw.len());
    for var_str in raw {
        if let Some((name, value)) = var_str.split_once('=') {
            if name.trim().is_empty() {
                color_eyre::eyre::bail!("Invalid variable format '{}'. Name is empty", var_str);
            }
            vars.push((name.trim().to_string(), value.to_string()));
        } else {
            color_eyre::eyre::bail!("Invalid variable format '{}'. Expected name=value", var_str);
        }
    }
    Ok(vars)
}

/// Seed the environment and apply a `--clusters` override
pub fn environment(
    config: &ScenarioConfig,
    raw_vars: &[String],
    clusters: Option<&str>,
) -> Result<Environment> {
    let vars = parse_vars(raw_vars)?;
    let env = config.seed_environment(&vars);
    if let Some(clusters) = clusters {
        env.set(flow_service::scenario::vars::CLUSTERS, [clusters]);
    }
    Ok(env)
}
