use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use flow_service::{scenario_enabled, select_cluster_managers, DEFAULT_CONFIG_FILE};

/// Check that the scenario can run on this machine
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Scenario configuration file
    #[arg(long, short = 'c', value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Set a variable (can be repeated, format: name=value)
    #[arg(long = "var", short = 'v', value_name = "NAME=VALUE")]
    pub variables: Vec<String>,
}

pub fn execute(args: CheckArgs) -> Result<()> {
    output::phase("Checking", &format!("{}", args.config.display()));

    let config = match super::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            output::fatal(&format!("{}", e));
            std::process::exit(1);
        }
    };
    output::confirmed("Configuration valid");
    output::detail(&format!(
        "    {} platform(s), {} provisioner(s)",
        config.platforms.len(),
        config.provisioners.len()
    ));

    let mut ok = true;
    match config.find_cli() {
        Ok(path) => output::confirmed(&format!("CLI '{}' found at {}", config.cli, path.display())),
        Err(e) => {
            output::verdict(false, &e.to_string());
            ok = false;
        }
    }

    let env = super::environment(&config, &args.variables, None)?;
    let clusters = select_cluster_managers(&env.get(flow_service::scenario::vars::CLUSTERS));
    for cluster in &clusters {
        output::note(&format!(
            "Cluster backend '{}' ({} provisioner)",
            cluster.name(),
            cluster.provisioner()
        ));
    }

    if scenario_enabled(&env) {
        output::confirmed("Scenario enabled");
    } else {
        output::warn("Scenario disabled; `run` will exit without doing anything");
    }

    if !ok {
        std::process::exit(1);
    }

    println!();
    output::verdict(true, "Ready to run");
    Ok(())
}
