//! Unified hopchain CLI.
//!
//! - `hopchain forward` - Bind remote listeners through chains and forward
//!   accepted traffic to local targets

use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// hopchain unified CLI.
#[derive(Parser)]
#[command(
    name = "hopchain",
    version,
    about = "Proxy chains with relay reverse binds",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured reverse forwards.
    #[command(name = "forward", alias = "fwd")]
    Forward(hopchain::cli::ForwardArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Forward(args) => hopchain::cli::run_forward(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
