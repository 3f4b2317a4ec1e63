use anyhow::{bail, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

/// Search Benchmark Suite - replays command records against a search-capable
/// data store and measures per-command latency and throughput
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// The host:port of the target data store
    #[clap(long, default_value = crate::defaults::HOST)]
    pub host: String,

    /// Name of the index the run loads or queries
    #[clap(long, default_value = "idx1")]
    pub index: String,

    /// Number of records to batch together per dispatch unit
    #[clap(long, default_value_t = crate::defaults::BATCH_SIZE)]
    pub batch_size: usize,

    /// Number of parallel workers issuing commands (0 = number of CPUs)
    #[clap(long, default_value_t = crate::defaults::WORKERS)]
    pub workers: usize,

    /// Pipeline flush threshold: pending operations per round trip
    #[clap(long, default_value_t = crate::defaults::PIPELINE)]
    pub pipeline: usize,

    /// Number of records to replay (0 = all of them)
    #[clap(long, default_value_t = 0)]
    pub limit: u64,

    /// Whether to dispatch commands; false only drains the input to measure
    /// read throughput
    #[clap(long, default_value_t = true, action = ArgAction::Set)]
    pub do_benchmark: bool,

    /// Whether to drop a pre-existing index before the run
    #[clap(long, default_value_t = true, action = ArgAction::Set)]
    pub do_create_db: bool,

    /// Abort if an index with the given name already exists
    #[clap(long, default_value_t = false)]
    pub do_abort_on_exist: bool,

    /// Period between stat reports (e.g. "1s", "500ms"; "0s" disables)
    #[clap(long, value_parser = parse_duration, default_value = crate::defaults::REPORTING_PERIOD)]
    pub reporting_period: Duration,

    /// File to read records from (empty = standard input)
    #[clap(long, default_value = "")]
    pub file: String,

    /// File to write the JSON result document to
    #[clap(long)]
    pub json_out_file: Option<PathBuf>,

    /// Free-form metadata string carried into the result document
    #[clap(long, default_value = "")]
    pub metadata_string: String,

    /// Keep running when a pipelined round trip fails
    #[clap(long, default_value_t = false)]
    pub continue_on_error: bool,

    /// Address the target as a cluster entry point
    #[clap(long, default_value_t = false)]
    pub cluster_mode: bool,

    /// Debug verbosity level (0 = quiet)
    #[clap(long, default_value_t = 0)]
    pub debug: usize,
}

/// Validated benchmark configuration.
///
/// Constructed once from the parsed arguments and passed by reference into
/// the engine; there is no process-wide mutable runner state.
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    pub host: String,
    pub db_name: String,
    pub batch_size: usize,
    pub workers: usize,
    pub pipeline: usize,
    pub limit: u64,
    pub do_load: bool,
    pub do_create_db: bool,
    pub do_abort_on_exist: bool,
    pub reporting_period: Duration,
    pub file_name: String,
    pub json_out_file: Option<PathBuf>,
    pub metadata: String,
    pub continue_on_error: bool,
    pub cluster_mode: bool,
    pub debug: usize,
}

impl BenchmarkConfig {
    /// Create a benchmark configuration from CLI arguments, applying
    /// defaults and validating ranges.
    pub fn from_args(args: &Args) -> Result<Self> {
        if args.batch_size == 0 {
            bail!("batch-size must be positive");
        }
        if args.pipeline == 0 {
            bail!("pipeline must be positive");
        }

        let workers = if args.workers == 0 {
            num_cpus::get()
        } else {
            args.workers
        };

        Ok(Self {
            host: args.host.clone(),
            db_name: args.index.clone(),
            batch_size: args.batch_size,
            workers,
            pipeline: args.pipeline,
            limit: args.limit,
            do_load: args.do_benchmark,
            do_create_db: args.do_create_db,
            do_abort_on_exist: args.do_abort_on_exist,
            reporting_period: args.reporting_period,
            file_name: args.file.clone(),
            json_out_file: args.json_out_file.clone(),
            metadata: args.metadata_string.clone(),
            continue_on_error: args.continue_on_error,
            cluster_mode: args.cluster_mode,
            debug: args.debug,
        })
    }
}

/// Parse duration from string (e.g. "500ms", "10s", "5m", "1h")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!(
            "Duration must be a finite, non-negative number: {}",
            s
        ));
    }

    // Fractions carry through: "0.5s" is 500ms, not a truncated zero that
    // would silently disable periodic reporting.
    let seconds = match unit {
        "ms" => num / 1000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Ok(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args::parse_from(["search-bench"])
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);

        assert!(parse_duration("").is_err());
        assert!(parse_duration("invalid").is_err());
    }

    #[test]
    fn test_parse_duration_keeps_fractions() {
        assert_eq!(parse_duration("0.5s").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1.5m").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2.5ms").unwrap(), Duration::from_micros(2_500));

        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("NaNs").is_err());
    }

    #[test]
    fn test_default_args() {
        let args = base_args();
        assert_eq!(args.host, "localhost:6379");
        assert_eq!(args.batch_size, 1000);
        assert_eq!(args.workers, 8);
        assert_eq!(args.pipeline, 50);
        assert_eq!(args.limit, 0);
        assert!(args.do_benchmark);
        assert!(args.do_create_db);
        assert!(!args.do_abort_on_exist);
        assert_eq!(args.reporting_period, Duration::from_secs(1));
        assert!(!args.continue_on_error);
        assert!(!args.cluster_mode);
    }

    #[test]
    fn test_boolean_flags_take_explicit_values() {
        let args = Args::parse_from([
            "search-bench",
            "--do-benchmark",
            "false",
            "--do-create-db",
            "false",
            "--continue-on-error",
        ]);
        assert!(!args.do_benchmark);
        assert!(!args.do_create_db);
        assert!(args.continue_on_error);
    }

    #[test]
    fn test_config_rejects_zero_batch_size() {
        let mut args = base_args();
        args.batch_size = 0;
        assert!(BenchmarkConfig::from_args(&args).is_err());
    }

    #[test]
    fn test_config_rejects_zero_pipeline() {
        let mut args = base_args();
        args.pipeline = 0;
        assert!(BenchmarkConfig::from_args(&args).is_err());
    }

    #[test]
    fn test_config_zero_workers_uses_cpu_count() {
        let mut args = base_args();
        args.workers = 0;
        let config = BenchmarkConfig::from_args(&args).unwrap();
        assert!(config.workers > 0);
    }

    #[test]
    fn test_config_carries_flags() {
        let args = Args::parse_from([
            "search-bench",
            "--host",
            "10.0.0.5:6380",
            "--index",
            "enwiki",
            "--limit",
            "5000",
            "--metadata-string",
            "nightly",
        ]);
        let config = BenchmarkConfig::from_args(&args).unwrap();
        assert_eq!(config.host, "10.0.0.5:6380");
        assert_eq!(config.db_name, "enwiki");
        assert_eq!(config.limit, 5000);
        assert_eq!(config.metadata, "nightly");
        assert!(config.do_load);
    }
}
