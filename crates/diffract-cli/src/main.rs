//! Diffract CLI - run and inspect diffraction reductions.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use diffract::observability::init_logging;

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    init_logging(cli.log_format.into(), level);

    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args, cli.verbose),

        Commands::Params { output } => commands::params::run(output, cli.verbose),

        Commands::Status { archive, json } => commands::status::run(archive, json, cli.verbose),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
