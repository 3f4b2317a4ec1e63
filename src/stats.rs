use crate::record::CommandCategory;
use anyhow::Result;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Lower and upper bounds of the latency histograms, in microseconds.
pub const HISTOGRAM_MIN_US: u64 = 1;
pub const HISTOGRAM_MAX_US: u64 = 1_000_000;

/// Significant-figure precision of the latency histograms.
pub const HISTOGRAM_SIGFIGS: u8 = 3;

/// A single-command observation produced by a processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdStat {
    pub category: CommandCategory,
    pub latency_us: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

/// Aggregation of zero or more command observations for one batch.
#[derive(Debug, Default)]
pub struct Stat {
    cmd_stats: Vec<CmdStat>,
}

impl Stat {
    pub fn push(&mut self, stat: CmdStat) {
        self.cmd_stats.push(stat);
    }

    pub fn merge(&mut self, other: Stat) {
        self.cmd_stats.extend(other.cmd_stats);
    }

    pub fn extend(&mut self, stats: Vec<CmdStat>) {
        self.cmd_stats.extend(stats);
    }

    pub fn cmd_stats(&self) -> &[CmdStat] {
        &self.cmd_stats
    }

    pub fn len(&self) -> usize {
        self.cmd_stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmd_stats.is_empty()
    }
}

/// One point of a per-category time series, appended at every reporting tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp_s: i64,
    pub values: BTreeMap<String, f64>,
}

/// Cumulative plus instantaneous histogram for one operation category.
///
/// The cumulative histogram accumulates for the process lifetime; the
/// instantaneous one is reset after every reporting tick. Both are guarded
/// by a mutex so workers can record concurrently without external locking.
struct HistogramPair {
    cumulative: Mutex<Histogram<u64>>,
    instantaneous: Mutex<Histogram<u64>>,
}

impl HistogramPair {
    fn new() -> Result<Self> {
        Ok(Self {
            cumulative: Mutex::new(new_latency_histogram()?),
            instantaneous: Mutex::new(new_latency_histogram()?),
        })
    }

    /// Record into both histograms. Returns false if the value was out of
    /// range and dropped.
    fn record(&self, latency_us: u64) -> bool {
        if latency_us < HISTOGRAM_MIN_US || self.cumulative.lock().record(latency_us).is_err() {
            return false;
        }
        // Same bounds, so this cannot fail if the cumulative record passed.
        let _ = self.instantaneous.lock().record(latency_us);
        true
    }

    fn cumulative_count(&self) -> u64 {
        self.cumulative.lock().len()
    }

    fn cumulative_quantile_ms(&self, quantile: f64) -> f64 {
        let hist = self.cumulative.lock();
        if hist.is_empty() {
            return 0.0;
        }
        hist.value_at_quantile(quantile) as f64 / 1_000.0
    }

    fn cumulative_quantile_map(&self) -> (u64, BTreeMap<String, f64>) {
        quantile_map(&self.cumulative.lock())
    }

    /// Snapshot the instantaneous histogram and reset it.
    fn take_instantaneous(&self) -> (u64, BTreeMap<String, f64>) {
        let mut hist = self.instantaneous.lock();
        let snapshot = quantile_map(&hist);
        hist.reset();
        snapshot
    }

    fn instantaneous_count(&self) -> u64 {
        self.instantaneous.lock().len()
    }
}

fn new_latency_histogram() -> Result<Histogram<u64>> {
    Ok(Histogram::new_with_bounds(
        HISTOGRAM_MIN_US,
        HISTOGRAM_MAX_US,
        HISTOGRAM_SIGFIGS,
    )?)
}

/// Total count plus q50/q95/q99 (in milliseconds) for a histogram.
///
/// Quantiles are reported as zero when the histogram is empty so the zero
/// guard is applied before any division can produce a NaN.
pub fn quantile_map(hist: &Histogram<u64>) -> (u64, BTreeMap<String, f64>) {
    let ops = hist.len();
    let (q50, q95, q99) = if ops > 0 {
        (
            hist.value_at_quantile(0.50) as f64 / 1_000.0,
            hist.value_at_quantile(0.95) as f64 / 1_000.0,
            hist.value_at_quantile(0.99) as f64 / 1_000.0,
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    let mut values = BTreeMap::new();
    values.insert("q50".to_string(), q50);
    values.insert("q95".to_string(), q95);
    values.insert("q99".to_string(), q99);
    (ops, values)
}

/// Interval rate: delta of a non-decreasing counter over elapsed seconds.
pub fn calculate_rate(current: u64, previous: u64, elapsed_s: f64) -> f64 {
    if elapsed_s <= 0.0 {
        return 0.0;
    }
    current.saturating_sub(previous) as f64 / elapsed_s
}

/// Map NaN to the `-1.0` sentinel before serialization paths that forbid it.
pub fn wrap_nan(value: f64) -> f64 {
    if value.is_nan() {
        -1.0
    } else {
        value
    }
}

/// Format a byte rate for human-readable output.
pub fn format_byte_rate(bytes_per_second: f64) -> String {
    if bytes_per_second < 1024.0 {
        format!("{:.2} B/s", bytes_per_second)
    } else if bytes_per_second < 1024.0 * 1024.0 {
        format!("{:.2} KB/s", bytes_per_second / 1024.0)
    } else if bytes_per_second < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB/s", bytes_per_second / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB/s", bytes_per_second / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Measured operation-mix ratios over the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasuredRatios {
    pub measured_write_ratio: f64,
    pub measured_read_ratio: f64,
    pub measured_update_ratio: f64,
    pub measured_delete_ratio: f64,
}

/// Thread-safe aggregation point for all latency and byte-count
/// observations.
///
/// Histograms and the two byte counters are the only cross-worker shared
/// mutable state in the system; every update here is commutative, so global
/// ordering across workers is irrelevant to correctness.
pub struct StatRecorder {
    total: HistogramPair,
    categories: [HistogramPair; 6],
    tx_total_bytes: AtomicU64,
    rx_total_bytes: AtomicU64,
}

impl StatRecorder {
    pub fn new() -> Result<Self> {
        Ok(Self {
            total: HistogramPair::new()?,
            categories: [
                HistogramPair::new()?,
                HistogramPair::new()?,
                HistogramPair::new()?,
                HistogramPair::new()?,
                HistogramPair::new()?,
                HistogramPair::new()?,
            ],
            tx_total_bytes: AtomicU64::new(0),
            rx_total_bytes: AtomicU64::new(0),
        })
    }

    fn pair(&self, category: CommandCategory) -> &HistogramPair {
        &self.categories[category.index()]
    }

    /// Record one command observation.
    ///
    /// Out-of-range latencies are dropped with a warning rather than
    /// corrupting the histogram; byte counts are still accumulated.
    pub fn observe(&self, stat: &CmdStat) {
        self.tx_total_bytes.fetch_add(stat.tx_bytes, Ordering::Relaxed);
        self.rx_total_bytes.fetch_add(stat.rx_bytes, Ordering::Relaxed);

        let in_range =
            self.total.record(stat.latency_us) && self.pair(stat.category).record(stat.latency_us);
        if !in_range {
            warn!(
                latency_us = stat.latency_us,
                category = %stat.category,
                "latency observation outside histogram bounds, dropped"
            );
        }
    }

    /// Lifetime operation count for one category.
    pub fn cumulative_count(&self, category: CommandCategory) -> u64 {
        self.pair(category).cumulative_count()
    }

    /// Lifetime operation count across all categories.
    pub fn total_ops(&self) -> u64 {
        self.total.cumulative_count()
    }

    /// Lifetime quantile (milliseconds) for one category.
    pub fn cumulative_quantile_ms(&self, category: CommandCategory, quantile: f64) -> f64 {
        self.pair(category).cumulative_quantile_ms(quantile)
    }

    /// Lifetime quantile (milliseconds) across all categories.
    pub fn total_quantile_ms(&self, quantile: f64) -> f64 {
        self.total.cumulative_quantile_ms(quantile)
    }

    /// Lifetime q50/q95/q99 map for one category.
    pub fn cumulative_quantiles(&self, category: CommandCategory) -> BTreeMap<String, f64> {
        self.pair(category).cumulative_quantile_map().1
    }

    /// Snapshot-and-reset of the instantaneous histogram for one category.
    ///
    /// Called by the reporter at every tick; returns the windowed operation
    /// count and quantile map.
    pub fn take_instantaneous(&self, category: CommandCategory) -> (u64, BTreeMap<String, f64>) {
        self.pair(category).take_instantaneous()
    }

    /// Reset the instantaneous total histogram as well; the reporter calls
    /// this once per tick after the per-category snapshots.
    pub fn reset_instantaneous_total(&self) {
        self.total.instantaneous.lock().reset();
    }

    /// Windowed operation count for one category without resetting.
    pub fn instantaneous_count(&self, category: CommandCategory) -> u64 {
        self.pair(category).instantaneous_count()
    }

    pub fn tx_total_bytes(&self) -> u64 {
        self.tx_total_bytes.load(Ordering::Relaxed)
    }

    pub fn rx_total_bytes(&self) -> u64 {
        self.rx_total_bytes.load(Ordering::Relaxed)
    }

    /// Operation-mix ratios with the NaN sentinel applied uniformly, so both
    /// the summary and JSON paths observe the same guarded values.
    pub fn measured_ratios(&self) -> MeasuredRatios {
        let total_ops = self.total_ops() as f64;
        let writes = (self.cumulative_count(CommandCategory::Write)
            + self.cumulative_count(CommandCategory::SetupWrite)) as f64;
        let reads = (self.cumulative_count(CommandCategory::Read)
            + self.cumulative_count(CommandCategory::CursorRead)) as f64;
        let updates = self.cumulative_count(CommandCategory::Update) as f64;
        let deletes = self.cumulative_count(CommandCategory::Delete) as f64;

        MeasuredRatios {
            measured_write_ratio: wrap_nan(writes / total_ops),
            measured_read_ratio: wrap_nan(reads / total_ops),
            measured_update_ratio: wrap_nan(updates / total_ops),
            measured_delete_ratio: wrap_nan(deletes / total_ops),
        }
    }
}
