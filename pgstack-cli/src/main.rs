use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use pgstack_core::Config;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod commands;

use commands::{exit, Context, Overrides};

#[derive(Parser)]
#[command(name = "pgstack")]
#[command(about = "Start, stop and inspect local PostgreSQL stacks", long_about = None)]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Stack catalog file (defaults to the built-in catalog)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Readiness timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Delay between readiness probes in milliseconds
    #[arg(long, global = true)]
    poll_interval: Option<u64>,

    /// Answer yes to confirmations (never stops other stacks)
    #[arg(short = 'y', long = "yes", global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a stack and wait until it is ready
    Start {
        /// Stack id (e.g. "dev", "citus", "patroni")
        stack: String,

        /// Also start the optional tools profile
        #[arg(long)]
        tools: bool,

        /// Start even if ports are held by something else
        #[arg(short, long)]
        force: bool,
    },

    /// Stop a stack
    Stop {
        /// Stack id
        stack: String,

        /// Kill containers without a grace period
        #[arg(short, long)]
        force: bool,
    },

    /// Stop then start a stack
    Restart {
        /// Stack id
        stack: String,

        /// Also start the optional tools profile
        #[arg(long)]
        tools: bool,

        /// Kill containers without a grace period when stopping
        #[arg(short, long)]
        force: bool,
    },

    /// Show every stack and host resources (always exits 0)
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show stack logs
    Logs {
        /// Stack id
        stack: String,

        /// Keep streaming new output
        #[arg(short, long)]
        follow: bool,

        /// Number of lines from the end of each service's log
        #[arg(long)]
        tail: Option<u32>,
    },

    /// Stop a stack and delete its volumes
    Clean {
        /// Stack id
        stack: String,
    },

    /// Menu-driven session
    #[command(alias = "menu")]
    Interactive,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            ExitCode::from(commands::exit_code_for(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let overrides = Overrides {
        catalog: cli.catalog,
        timeout_secs: cli.timeout,
        poll_interval_ms: cli.poll_interval,
        assume_yes: cli.yes,
    };

    let is_status = matches!(cli.command, Commands::Status { .. });

    let mut config = match Config::load().context("Failed to load configuration") {
        Ok(config) => config,
        Err(e) => return setup_failed(is_status, e),
    };
    overrides.apply(&mut config);
    pgstack_core::init_observability(&config.log_level, cli.verbose)?;

    // Ctrl-C stops waiting; containers are left as they are
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted");
                cancel.cancel();
            }
        });
    }

    let ctx = match Context::build(config, &overrides, cancel.clone(), !is_status) {
        Ok(ctx) => ctx,
        Err(e) => return setup_failed(is_status, e),
    };

    match cli.command {
        Commands::Start { stack, tools, force } => commands::lifecycle::start(&ctx, &stack, tools, force).await,
        Commands::Stop { stack, force } => commands::lifecycle::stop(&ctx, &stack, force).await,
        Commands::Restart { stack, tools, force } => commands::lifecycle::restart(&ctx, &stack, tools, force).await,
        Commands::Status { json } => commands::status::status(&ctx, json).await,
        Commands::Logs { stack, follow, tail } => commands::logs::logs(&ctx, &stack, follow, tail).await,
        Commands::Clean { stack } => commands::lifecycle::clean(&ctx, &stack, overrides.assume_yes).await,
        Commands::Interactive => commands::interactive::run(&ctx, &cancel).await,
    }
}

/// `status` reports a broken setup and still exits 0; other commands fail.
fn setup_failed(is_status: bool, err: anyhow::Error) -> Result<u8> {
    if !is_status {
        return Err(err);
    }
    eprintln!("{} {:#}", "✗".red().bold(), err);
    Ok(exit::OK)
}
