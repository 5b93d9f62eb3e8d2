use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use flow_service::execution::events::progress_channel;
use flow_service::{
    installer_flows, scenario_enabled, select_cluster_managers, FlowEvent, FlowRunner,
    ReportFormat, RunReporter, RunnerConfig, DEFAULT_CONFIG_FILE,
};

/// Run the installer scenario
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario configuration file
    #[arg(long, short = 'c', value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Set a variable (can be repeated, format: name=value)
    #[arg(long = "var", short = 'v', value_name = "NAME=VALUE")]
    pub variables: Vec<String>,

    /// Cluster backends to provision, comma-separated (gce, minikube)
    #[arg(long, value_name = "CSV")]
    pub clusters: Option<String>,

    /// Report format: terminal, junit, tap, json
    #[arg(long, short = 'o', default_value = "terminal")]
    pub format: String,

    /// Run even when the `enabled` variable is not set
    #[arg(long)]
    pub force: bool,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let format: ReportFormat = args
        .format
        .parse()
        .map_err(|e: String| color_eyre::eyre::eyre!("{}", e))?;

    let config = super::load(&args.config)?;
    let env = super::environment(&config, &args.variables, args.clusters.as_deref())?;

    if !scenario_enabled(&env) && !args.force {
        output::warn(
            "Scenario disabled. Set INTEGRATION_enabled, pass --var enabled=1, or use --force",
        );
        return Ok(());
    }

    let clusters = select_cluster_managers(&env.get(flow_service::scenario::vars::CLUSTERS));
    if !clusters.is_empty() {
        let names: Vec<&str> = clusters.iter().map(|c| c.name()).collect();
        output::note(&format!("Cluster backends: {}", names.join(", ")));
    }

    let flows = installer_flows(&config, clusters);
    output::phase("Running", &format!("{} flows", flows.len()));

    // Create progress channel and runner
    let (tx, mut rx) = progress_channel();
    let runner = FlowRunner::new(flows)
        .with_config(RunnerConfig {
            poll_interval: config.poll_interval(),
        })
        .with_progress(tx);

    // Spawn the run in background
    let run_handle = tokio::spawn(async move { runner.run(&env).await });

    // Process events in the foreground
    while let Some(event) = rx.recv().await {
        render(&event);
    }

    let report = run_handle.await?;

    let rendered = RunReporter::report(&report, format);
    match format {
        ReportFormat::Terminal => eprint!("{}", rendered),
        _ => print!("{}", rendered),
    }

    if !report.success() {
        std::process::exit(1);
    }

    Ok(())
}

fn render(event: &FlowEvent) {
    match event {
        FlowEvent::RunStarted { total_flows } => {
            println!();
            output::section(&format!("Run started ({} flows)", total_flows));
        }

        FlowEvent::FlowSkipped { flow, provides } => output::flow_skipped(flow, provides),

        FlowEvent::FlowStarted {
            flow,
            bindings,
            parallel,
        } => output::flow_started(flow, *bindings, *parallel),

        FlowEvent::BindingCompleted {
            binding,
            success,
            error,
            duration,
            ..
        } => {
            output::binding_finished(binding, *success, *duration);
            if let Some(error) = error {
                output::failure_text(error);
            }
        }

        FlowEvent::FlowCompleted {
            flow,
            success,
            duration,
        } => output::flow_finished(flow, *success, *duration),

        FlowEvent::RollbackStarted { total_flows } => {
            println!();
            output::section(&format!("Rolling back {} flows", total_flows));
        }

        FlowEvent::RollbackCompleted {
            flow,
            binding,
            success,
            error,
        } => {
            output::rolled_back(flow, binding, *success);
            if let Some(error) = error {
                output::failure_text(error);
            }
        }

        FlowEvent::CheckFailed { failure } => output::check_failed(&failure.to_string()),

        FlowEvent::RunCompleted {
            success,
            executed,
            skipped,
            rollback_failures,
            duration,
        } => {
            println!();
            let message = if *success {
                format!(
                    "Run completed in {:.2}s ({} executed, {} skipped)",
                    duration.as_secs_f64(),
                    executed,
                    skipped
                )
            } else {
                format!(
                    "Run failed after {:.2}s ({} executed, {} rollback failure(s))",
                    duration.as_secs_f64(),
                    executed,
                    rollback_failures
                )
            };
            output::verdict(*success, &message);
        }
    }
}
