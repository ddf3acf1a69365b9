//! Loam CLI - loam command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

/// Loam - incremental file-tree build pipeline
#[derive(Parser)]
#[command(name = "loam")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the pipeline and copy the final output to a directory
    Build {
        /// Pipeline file
        #[arg(short, long, default_value = cli_lib::CONFIG_FILE)]
        config: PathBuf,
        /// Output directory
        #[arg(short, long, default_value = "dist")]
        out: PathBuf,
        /// Replace the output directory if it exists
        #[arg(long)]
        overwrite: bool,
    },
    /// Validate the pipeline file and construct every node
    Check {
        /// Pipeline file
        #[arg(short, long, default_value = cli_lib::CONFIG_FILE)]
        config: PathBuf,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Build {
            config,
            out,
            overwrite,
        } => cmd::build::run(&config, &out, overwrite).await,
        Commands::Check { config } => cmd::check::run(&config).await,
    }
}
