use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use flow_service::{installer_flows, select_cluster_managers, DEFAULT_CONFIG_FILE};

/// List the scenario's flows in execution order
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Scenario configuration file
    #[arg(long, short = 'c', value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Cluster backends to include, comma-separated (gce, minikube)
    #[arg(long, value_name = "CSV")]
    pub clusters: Option<String>,
}

pub fn execute(args: ListArgs) -> Result<()> {
    let config = super::load(&args.config)?;
    let env = super::environment(&config, &[], args.clusters.as_deref())?;
    let flows = installer_flows(
        &config,
        select_cluster_managers(&env.get(flow_service::scenario::vars::CLUSTERS)),
    );

    println!();
    for (i, flow) in flows.iter().enumerate() {
        let mut traits = Vec::new();
        if flow.parallel {
            traits.push("parallel");
        }
        if flow.has_rollback() {
            traits.push("rollback");
        }
        let suffix = if traits.is_empty() {
            String::new()
        } else {
            format!(" [{}]", traits.join(", "))
        };
        println!("  {:>2}. {}{}", i + 1, flow.name, suffix);

        if !flow.provides.is_empty() {
            output::detail(&format!("        provides: {}", flow.provides.join(", ")));
        }
        if !flow.requires.is_empty() {
            output::detail(&format!("        requires: {}", flow.requires.join(", ")));
        }
        if !flow.matrix.is_empty() {
            let matrix: Vec<String> = flow
                .matrix
                .iter()
                .map(|(param, var)| format!("{} <- {}", param, var))
                .collect();
            output::detail(&format!("        matrix:   {}", matrix.join(", ")));
        }
    }
    println!();
    output::detail(&format!("  {} flow(s) total", flows.len()));

    Ok(())
}
