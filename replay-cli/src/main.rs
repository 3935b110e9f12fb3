use std::process;

use clap::Parser;
use mimalloc::MiMalloc;
use replay_engine::WorkerPool;
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use whisper_replay::{AppError, Args, Result, RunSettings};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose, args.quiet) {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let settings = RunSettings::try_from(args)?;
    info!(
        address = %settings.graphite.address(),
        protocol = %settings.graphite.protocol,
        "Replaying whisper archives"
    );

    let summary = WorkerPool::new(settings.replay, settings.graphite)
        .run()
        .await?;

    if summary.files_failed > 0 {
        info!(
            failed = summary.files_failed,
            "Some files could not be replayed, see errors above"
        );
    }
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}
