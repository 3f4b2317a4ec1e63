//! # Search Benchmark Suite Library
//!
//! A load-generation and benchmarking harness for search-capable data stores,
//! implemented in Rust. The harness replays large volumes of pre-generated
//! command records (inserts, updates, deletes, queries) against a target
//! system, measures per-command latency and throughput, and produces
//! aggregate and time-series statistics.
//!
//! ## Architecture Overview
//!
//! The library is organized into several key modules:
//!
//! - `scanner`: Reads serialized command records and feeds them to workers
//! - `batch`: Fixed-size batching and deterministic partition assignment
//! - `channel`: Bounded bidirectional backpressure queues (scanner ↔ workers)
//! - `worker`: The worker pool and the pluggable `Processor` seam
//! - `processor`: Pipelined command dispatch with a configurable flush threshold
//! - `stats`: Per-category HDR histograms, byte counters, and rate/ratio math
//! - `reporter`: Ticker-driven periodic reporting and time-series accumulation
//! - `results`: Result document assembly and JSON output
//! - `runner`: Orchestration of the complete benchmark lifecycle
//!
//! ## Data Flow
//!
//! ```text
//! Scanner → partitioner → DuplexChannel → Worker → Processor → target
//!                                           │
//!                                           └→ CmdStat → StatRecorder → Reporter
//! ```
//!
//! The scanner is the single producer; a fixed pool of workers consumes
//! batches in parallel. Backpressure from the bounded duplex channels is the
//! only throttling mechanism, capping memory at
//! `O(queue_capacity × batch_size)` records per partition.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use search_bench::{cli::Args, BenchmarkConfig, BenchmarkRunner};
//! use clap::Parser;
//!
//! fn main() -> anyhow::Result<()> {
//!     let args = Args::parse();
//!     let config = BenchmarkConfig::from_args(&args)?;
//!     let runner = BenchmarkRunner::new(config);
//!     let result = runner.run()?;
//!     println!("total ops: {}", result.totals.total_ops);
//!     Ok(())
//! }
//! ```
//!
//! ## Measurement Characteristics
//!
//! - **HDR histograms** (1..1,000,000 µs, 3 significant figures) for accurate
//!   latency percentiles without coordinated omission of the long tail
//! - **Cumulative and instantaneous** histogram pairs per operation category,
//!   backing lifetime quantiles and windowed time series respectively
//! - **Pipelined dispatch**: operations within one flush window share the
//!   round-trip completion time while keeping their individual enqueue times,
//!   matching established result semantics for cross-run comparability

pub mod batch;
pub mod channel;
pub mod cli;
pub mod logging;
pub mod processor;
pub mod record;
pub mod reporter;
pub mod resp;
pub mod results;
pub mod runner;
pub mod scanner;
pub mod stats;
pub mod worker;

// Re-export key types for convenient library usage

/// Main benchmark orchestration engine
pub use runner::{run_load, BenchmarkRunner, LoadOutcome};

/// Command-line interface types
pub use cli::{Args, BenchmarkConfig};

/// Core data model
pub use record::{CommandCategory, Record};

/// Batching and partitioning
pub use batch::{partition_for, Batch, BatchAccumulator};

/// Scanner/worker backpressure queue
pub use channel::DuplexChannel;

/// Measurement types
pub use stats::{CmdStat, DataPoint, Stat, StatRecorder};

/// The pluggable batch-processing seam
pub use worker::Processor;

/// Result document
pub use results::TestResult;

/// The current version of the search benchmark suite
///
/// This version string is automatically populated from Cargo.toml and used
/// in result output for reproducibility and debugging purposes.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
///
/// Sensible defaults for all configurable parameters, chosen to match the
/// historical behavior of prior result sets so that runs remain comparable.
pub mod defaults {
    /// Default number of records batched together per dispatch unit
    pub const BATCH_SIZE: usize = 1000;

    /// Default number of parallel workers issuing commands
    pub const WORKERS: usize = 8;

    /// Default pipeline flush threshold
    ///
    /// Operations accumulate in a per-worker outgoing buffer and are flushed
    /// as a single round trip once this many are pending.
    pub const PIPELINE: usize = 50;

    /// Default period between periodic stat reports, in the duration syntax
    /// the CLI accepts
    pub const REPORTING_PERIOD: &str = "1s";

    /// Read buffer size for the input record stream (4 MiB)
    ///
    /// Large enough that the scanner is never I/O bound on line reads for
    /// typical record sizes.
    pub const READ_BUFFER_SIZE: usize = 4 << 20;

    /// Target address used when none is supplied
    pub const HOST: &str = "localhost:6379";
}
