//! xmpm command-line interface
//!
//! Runs or validates an explicit MPM input file.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::LevelFilter;

/// Explicit material point method solver
#[derive(Parser)]
#[command(name = "xmpm")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Explicit MPM solver with embedded discontinuities", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error, off)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation
    Run(commands::run::RunArgs),
    /// Initialise every stage of an input file without stepping
    Validate(commands::validate::ValidateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level: LevelFilter = cli
        .log_level
        .parse()
        .with_context(|| format!("invalid log level '{}'", cli.log_level))?;
    env_logger::Builder::new()
        .filter_level(level)
        .format_target(false)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::execute(args),
        Commands::Validate(args) => commands::validate::execute(args),
    }
}
