use crate::cli::BenchmarkConfig;
use crate::processor::RedisProcessor;
use crate::reporter::{run_reporter, TimeSeries};
use crate::resp::IndexLifecycle;
use crate::results::TestResult;
use crate::scanner::scan;
use crate::stats::StatRecorder;
use crate::worker::{run_worker, FatalSignal, Processor};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufReader, Read};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// What a completed load phase produced, before result assembly.
#[derive(Debug)]
pub struct LoadOutcome {
    pub records_scanned: u64,
    pub time_series: TimeSeries,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Drive one complete load phase: spawn the reporter and one worker per
/// partition, scan the input on the calling thread, and wind everything
/// down in order.
///
/// `make_processor` is called once per worker on the calling thread; the
/// processor's own `init` then runs on the worker thread. Each worker gets
/// its own single-slot duplex channel, so the scanner can keep at most one
/// unacknowledged batch in flight per partition.
///
/// A fatal error raised by any worker aborts the run after the wind-down
/// completes; already-recorded observations are kept.
pub fn run_load<R, F, P>(
    input: R,
    config: &BenchmarkConfig,
    recorder: &Arc<StatRecorder>,
    make_processor: F,
) -> Result<LoadOutcome>
where
    R: Read,
    F: Fn(usize) -> P,
    P: Processor + Send,
{
    let fatal = Arc::new(FatalSignal::new());
    let channels: Vec<Arc<crate::channel::DuplexChannel>> = (0..config.workers)
        .map(|_| Arc::new(crate::channel::DuplexChannel::new(1)))
        .collect();

    let started_at = Utc::now();
    debug!(workers = config.workers, "starting load phase");

    let (time_series, scan_result) = std::thread::scope(|s| {
        let reporter = if config.reporting_period > Duration::ZERO {
            let (done_tx, done_rx) = crossbeam::channel::bounded(1);
            let recorder = Arc::clone(recorder);
            let period = config.reporting_period;
            let handle = s.spawn(move || run_reporter(recorder, period, done_rx));
            Some((done_tx, handle))
        } else {
            None
        };

        let mut workers = Vec::with_capacity(config.workers);
        for (index, channel) in channels.iter().enumerate() {
            let processor = make_processor(index);
            let channel = Arc::clone(channel);
            let recorder = Arc::clone(recorder);
            let fatal = Arc::clone(&fatal);
            let total = config.workers;
            let do_load = config.do_load;
            workers.push(s.spawn(move || {
                run_worker(processor, index, total, channel, recorder, do_load, fatal)
            }));
        }

        // The scanner closes every channel on all of its exit paths, so the
        // workers are guaranteed to drain and terminate.
        let scan_result = scan(input, config.batch_size, config.limit, &channels, &fatal);

        for worker in workers {
            if worker.join().is_err() {
                fatal.raise(anyhow!("worker thread panicked"));
            }
        }

        // The reporter is stopped only after the last worker has finished,
        // so every observation lands in some reporting window.
        let time_series = match reporter {
            Some((done_tx, handle)) => {
                let _ = done_tx.send(());
                match handle.join() {
                    Ok(series) => series,
                    Err(_) => {
                        fatal.raise(anyhow!("reporter thread panicked"));
                        TimeSeries::default()
                    }
                }
            }
            None => TimeSeries::default(),
        };

        (time_series, scan_result)
    });
    let finished_at = Utc::now();

    if let Some(err) = fatal.take() {
        return Err(err.context("benchmark aborted by a fatal error"));
    }
    let records_scanned = scan_result?;

    Ok(LoadOutcome {
        records_scanned,
        time_series,
        started_at,
        finished_at,
    })
}

/// End-to-end orchestration of one benchmark run: index lifecycle, input
/// setup, the load phase, and result output.
pub struct BenchmarkRunner {
    config: BenchmarkConfig,
}

impl BenchmarkRunner {
    pub fn new(config: BenchmarkConfig) -> Self {
        Self { config }
    }

    /// Run the benchmark to completion and return the result document.
    pub fn run(&self) -> Result<TestResult> {
        if self.config.do_load {
            self.prepare_index()?;
        }

        let recorder = Arc::new(StatRecorder::new()?);
        let outcome = self.run_with_input(&recorder)?;
        info!(records = outcome.records_scanned, "input stream exhausted");

        let result = TestResult::build(
            &self.config,
            &recorder,
            outcome.time_series,
            outcome.started_at,
            outcome.finished_at,
        );
        result.log_summary();

        if let Some(path) = &self.config.json_out_file {
            result.write_json(path)?;
            info!("results written to {}", path.display());
        }
        Ok(result)
    }

    /// Check the target index before the run.
    ///
    /// Index creation itself travels in the input stream as setup-write
    /// records; here a stale index is dropped (or the run aborted) so those
    /// records apply to a clean target.
    fn prepare_index(&self) -> Result<()> {
        let mut lifecycle = IndexLifecycle::connect(&self.config.host)
            .with_context(|| format!("cannot reach target at {}", self.config.host))?;

        if lifecycle.index_exists(&self.config.db_name)? {
            if self.config.do_abort_on_exist {
                bail!(
                    "index {:?} already exists on {}",
                    self.config.db_name,
                    self.config.host
                );
            }
            if self.config.do_create_db {
                info!("dropping pre-existing index {:?}", self.config.db_name);
                lifecycle.drop_index(&self.config.db_name)?;
            }
        }
        Ok(())
    }

    fn run_with_input(&self, recorder: &Arc<StatRecorder>) -> Result<LoadOutcome> {
        let make_processor = |_worker: usize| RedisProcessor::new(&self.config);

        if self.config.file_name.is_empty() {
            info!("reading records from standard input");
            let stdin = std::io::stdin();
            let input =
                BufReader::with_capacity(crate::defaults::READ_BUFFER_SIZE, stdin.lock());
            run_load(input, &self.config, recorder, make_processor)
        } else {
            info!("reading records from {}", self.config.file_name);
            let file = File::open(&self.config.file_name)
                .with_context(|| format!("cannot open input file {}", self.config.file_name))?;
            let input = BufReader::with_capacity(crate::defaults::READ_BUFFER_SIZE, file);
            run_load(input, &self.config, recorder, make_processor)
        }
    }
}
