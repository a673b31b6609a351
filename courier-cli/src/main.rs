mod cli;
mod commands;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::{Args, Commands};

/// Default log filter directive.
const DEFAULT_LOG_FILTER: &str = "courier=info,courier_engine=info";

/// Exit status when the message could not be delivered.
const EXIT_UNDELIVERED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.verbose, args.quiet, args.log_json);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = commands::load_config(&args.config)?;

    match args.command {
        Commands::Send {
            channel,
            to,
            message,
            json,
            output,
        } => {
            let payload = commands::read_payload(message, json)?;
            let router = commands::build_router(config)?;
            let delivered = commands::send(&router, &channel, &to, payload, output).await?;
            if !delivered {
                return Ok(ExitCode::from(EXIT_UNDELIVERED));
            }
        }
        Commands::Check { output } => {
            commands::check(config, output)?;
        }
        Commands::Simulate {
            channel,
            count,
            concurrency,
            to,
            output,
        } => {
            let router = Arc::new(commands::build_router(config)?);
            commands::simulate(router, &channel, count, concurrency, &to, output).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_logging(verbose: bool, quiet: bool, json: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(verbose)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
