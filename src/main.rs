//! CLI entry point for cbc-export, a Carbon Black Cloud export tool.
//!
//! Parses arguments, loads the optional config file, initializes logging
//! and hands the selected subcommand to [`cbc_export::cli::run`].
//!
//! Exit codes:
//! - 0: success
//! - 1: runtime error (missing settings, API error, poll timeout, etc.)
//! - 2: argument validation error (clap handles this automatically)

use std::process::ExitCode;

use clap::Parser;

use cbc_export::cli::{Args, run};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
