//! Flotilla CLI entry point.

use clap::Parser;

use flotilla::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => flotilla::cli::commands::run::execute(args, cli.json).await,
        Commands::Status(args) => flotilla::cli::commands::status::execute(args, cli.json).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => flotilla::cli::handle_error(err, cli.json),
    }
}
