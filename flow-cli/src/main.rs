mod commands;
mod logging;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;

use commands::check::CheckArgs;
use commands::list::ListArgs;
use commands::run::RunArgs;

#[derive(Parser, Debug)]
#[command(
    name = "flowrun",
    version,
    about = "Run rollback-safe integration flows against a platform installation"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the installer scenario, then tear down what it created
    Run(RunArgs),

    /// Print the flow sequence without running anything
    List(ListArgs),

    /// Validate the configuration and locate the platform CLI
    Check(CheckArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    logging::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => commands::run::execute(args).await,
        Command::List(args) => commands::list::execute(args),
        Command::Check(args) => commands::check::execute(args),
    }
}
