use crate::cli::BenchmarkConfig;
use crate::record::CommandCategory;
use crate::reporter::TimeSeries;
use crate::stats::{calculate_rate, format_byte_rate, DataPoint, MeasuredRatios, StatRecorder};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

/// Version tag of the result document layout. Downstream tooling keys on
/// this to decide how to parse the JSON, so bump it on any breaking change.
pub const RESULT_FORMAT_VERSION: &str = "0.1";

/// Lifetime operation and byte counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub total_ops: u64,
    pub setup_writes: u64,
    pub writes: u64,
    pub updates: u64,
    pub reads: u64,
    pub cursor_reads: u64,
    pub deletes: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

/// Whole-run average rates, plus human-readable byte rates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallRates {
    pub overall_ops_rate: f64,
    pub setup_write_rate: f64,
    pub write_rate: f64,
    pub update_rate: f64,
    pub read_rate: f64,
    pub cursor_read_rate: f64,
    pub delete_rate: f64,
    pub tx_byte_rate: f64,
    pub rx_byte_rate: f64,
    pub tx_byte_rate_human: String,
    pub rx_byte_rate_human: String,
}

/// The complete result document for one benchmark run.
///
/// Serialized to JSON when an output file is configured; the layout (field
/// names, the `q50`/`q95`/`q99` keys, millisecond quantile units, second
/// timestamps) is consumed by external comparison tooling and must stay
/// stable under [`RESULT_FORMAT_VERSION`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub result_format_version: String,
    pub metadata: String,
    pub db_name: String,
    pub start_time: i64,
    pub end_time: i64,
    pub duration_millis: i64,
    pub batch_size: usize,
    pub workers: usize,
    pub pipeline: usize,
    pub limit: u64,
    pub totals: Totals,
    #[serde(flatten)]
    pub measured_ratios: MeasuredRatios,
    pub overall_rates: OverallRates,
    /// Lifetime q50/q95/q99 (milliseconds) per category, plus the
    /// `allCommands` aggregate.
    pub overall_quantiles: BTreeMap<String, BTreeMap<String, f64>>,
    /// Per-category windowed data points, sorted by timestamp.
    pub time_series: BTreeMap<String, Vec<DataPoint>>,
}

impl TestResult {
    /// Assemble the result document from the run's recorder and time series.
    pub fn build(
        config: &BenchmarkConfig,
        recorder: &StatRecorder,
        time_series: TimeSeries,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let duration_millis = (finished_at - started_at).num_milliseconds().max(0);
        let elapsed_s = duration_millis as f64 / 1_000.0;

        let count = |category| recorder.cumulative_count(category);
        let totals = Totals {
            total_ops: recorder.total_ops(),
            setup_writes: count(CommandCategory::SetupWrite),
            writes: count(CommandCategory::Write),
            updates: count(CommandCategory::Update),
            reads: count(CommandCategory::Read),
            cursor_reads: count(CommandCategory::CursorRead),
            deletes: count(CommandCategory::Delete),
            tx_bytes: recorder.tx_total_bytes(),
            rx_bytes: recorder.rx_total_bytes(),
        };

        let rate = |ops| calculate_rate(ops, 0, elapsed_s);
        let tx_byte_rate = rate(totals.tx_bytes);
        let rx_byte_rate = rate(totals.rx_bytes);
        let overall_rates = OverallRates {
            overall_ops_rate: rate(totals.total_ops),
            setup_write_rate: rate(totals.setup_writes),
            write_rate: rate(totals.writes),
            update_rate: rate(totals.updates),
            read_rate: rate(totals.reads),
            cursor_read_rate: rate(totals.cursor_reads),
            delete_rate: rate(totals.deletes),
            tx_byte_rate,
            rx_byte_rate,
            tx_byte_rate_human: format_byte_rate(tx_byte_rate),
            rx_byte_rate_human: format_byte_rate(rx_byte_rate),
        };

        let mut overall_quantiles = BTreeMap::new();
        for category in CommandCategory::ALL {
            overall_quantiles.insert(
                category.json_key().to_string(),
                recorder.cumulative_quantiles(category),
            );
        }
        let mut all_commands = BTreeMap::new();
        for (key, quantile) in [("q50", 0.50), ("q95", 0.95), ("q99", 0.99)] {
            all_commands.insert(key.to_string(), recorder.total_quantile_ms(quantile));
        }
        overall_quantiles.insert("allCommands".to_string(), all_commands);

        Self {
            result_format_version: RESULT_FORMAT_VERSION.to_string(),
            metadata: config.metadata.clone(),
            db_name: config.db_name.clone(),
            start_time: started_at.timestamp_millis(),
            end_time: finished_at.timestamp_millis(),
            duration_millis,
            batch_size: config.batch_size,
            workers: config.workers,
            pipeline: config.pipeline,
            limit: config.limit,
            totals,
            measured_ratios: recorder.measured_ratios(),
            overall_rates,
            overall_quantiles,
            time_series: time_series.into_sorted_map(),
        }
    }

    /// Write the document as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("cannot create result file {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("cannot serialize results to {}", path.display()))?;
        Ok(())
    }

    /// Log the end-of-run summary.
    pub fn log_summary(&self) {
        info!(
            "run complete in {:.3}s against {:?}",
            self.duration_millis as f64 / 1_000.0,
            self.db_name
        );
        info!(
            "total ops {} ({:.0} ops/s), TX {} RX {}",
            self.totals.total_ops,
            self.overall_rates.overall_ops_rate,
            self.overall_rates.tx_byte_rate_human,
            self.overall_rates.rx_byte_rate_human
        );
        for category in CommandCategory::ALL {
            let quantiles = &self.overall_quantiles[category.json_key()];
            info!(
                "{:>12}: q50 {:.3}ms q95 {:.3}ms q99 {:.3}ms",
                category.label(),
                quantiles["q50"],
                quantiles["q95"],
                quantiles["q99"]
            );
        }
    }
}
