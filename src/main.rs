//! # Search Benchmark Suite - Main Entry Point
//!
//! Command-line entry point for the search benchmark harness. The binary:
//!
//! 1. **Initializes logging**: structured output via tracing, colored by
//!    severity, with the level controlled through `RUST_LOG`
//! 2. **Parses arguments**: command-line configuration via clap
//! 3. **Prepares the target**: optional index existence check and drop
//! 4. **Replays the input stream**: scanner, worker pool, and periodic
//!    reporting
//! 5. **Emits results**: end-of-run summary and optional JSON document
//!
//! All fallible paths use `anyhow::Result`; a fatal error during the run
//! terminates the process with a non-zero exit status after the worker pool
//! has wound down.

use anyhow::Result;
use clap::Parser;
use search_bench::cli::{Args, BenchmarkConfig};
use search_bench::logging::ColorizedFormatter;
use search_bench::runner::BenchmarkRunner;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // RUST_LOG overrides the default; e.g. RUST_LOG=debug for verbose runs.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .event_format(ColorizedFormatter)
        .init();

    let args = Args::parse();
    debug!("configuration: {:?}", args);

    let config = BenchmarkConfig::from_args(&args)?;
    info!(
        "search-bench v{} starting against {} (index {:?}, {} workers, batch size {}, pipeline {})",
        search_bench::VERSION,
        config.host,
        config.db_name,
        config.workers,
        config.batch_size,
        config.pipeline
    );

    let runner = BenchmarkRunner::new(config);
    runner.run()?;
    Ok(())
}
