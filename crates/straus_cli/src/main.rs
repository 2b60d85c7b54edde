//! Erdős–Straus verification CLI
//!
//! Checks that 4/p = 1/a + 1/b + 1/c has a solution for every prime in a range.
//!
//! # Usage
//! ```bash
//! # Verify a range with a resumable checkpoint
//! straus-verify verify --lo 2 --hi 100000000 --checkpoint run.ckpt --flagged flagged.jsonl
//!
//! # Filter statistics, refined with the built-in extension table
//! straus-verify sieve --builtin-extension --export sieve.csv
//!
//! # Decompose individual primes
//! straus-verify solve 1009 1129 2521
//! ```

mod common;
mod sieve;
mod solve;
mod verify;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "straus-verify")]
#[command(about = "Range verification of the Erdős–Straus conjecture")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify every prime in [lo, hi), resuming from a checkpoint
    Verify(verify::VerifyArgs),

    /// Report the hard residues of an identity table and its refinements
    Sieve(sieve::SieveArgs),

    /// Decompose the given primes
    Solve(solve::SolveArgs),
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Verify(args) => verify::run(args),
        Commands::Sieve(args) => sieve::run(args).map(|()| ExitCode::SUCCESS),
        Commands::Solve(args) => solve::run(args),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::from(3)
        }
    }
}
