use crate::record::CommandCategory;
use crate::stats::{calculate_rate, format_byte_rate, DataPoint, StatRecorder};
use crossbeam::channel::{tick, Receiver};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::info;

/// Per-category time series accumulated over a run.
///
/// Owned exclusively by the reporter task while the run is live; surfaced to
/// the result document (sorted by timestamp) only after the reporter exits.
#[derive(Debug, Default)]
pub struct TimeSeries {
    series: BTreeMap<&'static str, Vec<DataPoint>>,
}

impl TimeSeries {
    pub fn push(&mut self, category: CommandCategory, point: DataPoint) {
        self.series.entry(category.json_key()).or_default().push(point);
    }

    pub fn points(&self, category: CommandCategory) -> &[DataPoint] {
        self.series
            .get(category.json_key())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Sort every series by timestamp and convert to the serializable form.
    ///
    /// Sorting defends against ticker or clock jitter producing out-of-order
    /// points.
    pub fn into_sorted_map(mut self) -> BTreeMap<String, Vec<DataPoint>> {
        let mut out = BTreeMap::new();
        for category in CommandCategory::ALL {
            let mut points = self.series.remove(category.json_key()).unwrap_or_default();
            points.sort_by_key(|p| p.timestamp_s);
            out.insert(category.json_key().to_string(), points);
        }
        out
    }
}

/// Windowed per-category counters from the previous tick.
#[derive(Debug, Default, Clone, Copy)]
struct PreviousCounts {
    per_category: [u64; 6],
    total_ops: u64,
    tx_bytes: u64,
    rx_bytes: u64,
}

/// Ticker-driven reporter.
///
/// Fully decoupled from the scanner/worker data path: it only reads shared
/// counters and histograms and never blocks producers or consumers. After
/// each tick it appends one data point per category and resets the
/// instantaneous histograms (cumulative ones are untouched).
///
/// Runs until `done` fires, then returns the accumulated time series.
pub fn run_reporter(
    recorder: Arc<StatRecorder>,
    period: Duration,
    done: Receiver<()>,
) -> TimeSeries {
    let mut series = TimeSeries::default();
    let mut prev = PreviousCounts::default();
    let mut prev_tick = Instant::now();
    let ticker = tick(period);

    info!(
        "{:>16} {:>12} {:>12} {:>12} {:>14} {:>12} {:>16} {:>12} {:>12} {:>12}",
        "setup writes/s",
        "writes/s",
        "updates/s",
        "reads/s",
        "cursor reads/s",
        "deletes/s",
        "current ops/s",
        "total ops",
        "TX BW",
        "RX BW"
    );

    loop {
        crossbeam::channel::select! {
            recv(ticker) -> _ => {
                let now = Instant::now();
                let elapsed = now.saturating_duration_since(prev_tick).as_secs_f64();
                prev = report_tick(&recorder, &mut series, prev, elapsed);
                prev_tick = now;
            }
            recv(done) -> _ => break,
        }
    }

    // The workers have already joined when the done signal fires, so one
    // last snapshot captures whatever landed after the final tick.
    let elapsed = Instant::now()
        .saturating_duration_since(prev_tick)
        .as_secs_f64();
    report_tick(&recorder, &mut series, prev, elapsed);

    series
}

/// One reporting tick: log windowed rates, append data points, reset the
/// instantaneous histograms.
fn report_tick(
    recorder: &StatRecorder,
    series: &mut TimeSeries,
    prev: PreviousCounts,
    elapsed_s: f64,
) -> PreviousCounts {
    let timestamp_s = unix_now_s();

    let mut current = PreviousCounts {
        total_ops: recorder.total_ops(),
        tx_bytes: recorder.tx_total_bytes(),
        rx_bytes: recorder.rx_total_bytes(),
        ..Default::default()
    };
    for category in CommandCategory::ALL {
        current.per_category[category.index()] = recorder.cumulative_count(category);
    }

    let rate_of = |category: CommandCategory| {
        calculate_rate(
            current.per_category[category.index()],
            prev.per_category[category.index()],
            elapsed_s,
        )
    };

    info!(
        "{:>16.0} {:>12.0} {:>12.0} {:>12.0} {:>14.0} {:>12.0} {:>16.0} {:>12} {:>12} {:>12}",
        rate_of(CommandCategory::SetupWrite),
        rate_of(CommandCategory::Write),
        rate_of(CommandCategory::Update),
        rate_of(CommandCategory::Read),
        rate_of(CommandCategory::CursorRead),
        rate_of(CommandCategory::Delete),
        calculate_rate(current.total_ops, prev.total_ops, elapsed_s),
        current.total_ops,
        format_byte_rate(calculate_rate(current.tx_bytes, prev.tx_bytes, elapsed_s)),
        format_byte_rate(calculate_rate(current.rx_bytes, prev.rx_bytes, elapsed_s)),
    );

    // One data point per category from the windowed histograms, which are
    // reset as they are snapshotted.
    for category in CommandCategory::ALL {
        let (windowed_ops, mut values) = recorder.take_instantaneous(category);
        let rate = if elapsed_s > 0.0 {
            windowed_ops as f64 / elapsed_s
        } else {
            0.0
        };
        values.insert("rate".to_string(), rate);
        series.push(
            category,
            DataPoint {
                timestamp_s,
                values,
            },
        );
    }
    recorder.reset_instantaneous_total();

    current
}

fn unix_now_s() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
