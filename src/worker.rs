use crate::batch::Batch;
use crate::channel::DuplexChannel;
use crate::stats::{Stat, StatRecorder};
use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// The pluggable seam between the load engine and the target system.
///
/// A processor turns one batch of records into dispatched operations and
/// returns the per-command observations. Implementations own their network
/// resources; the engine guarantees `init` is called exactly once before the
/// first batch and `close` exactly once after the worker's channel drains.
pub trait Processor {
    /// Per-worker setup, run on the worker thread before any batch arrives.
    fn init(&mut self, worker_index: usize, total_workers: usize) -> Result<()>;

    /// Dispatch one batch. With `do_load == false` the batch is drained
    /// without network dispatch and no stats are produced (dry-run mode for
    /// measuring input read throughput).
    fn process_batch(&mut self, batch: Batch, do_load: bool) -> Result<Stat>;

    /// Cleanup hook; flushes any operations still buffered below the
    /// pipeline threshold and returns their observations.
    fn close(&mut self, do_load: bool) -> Result<Stat> {
        let _ = do_load;
        Ok(Stat::default())
    }
}

/// First-fatal-error slot shared between workers, scanner, and runner.
///
/// A worker that hits an unrecoverable dispatch error parks it here and
/// raises the flag; the scanner polls the flag between records and winds the
/// run down instead of feeding further batches.
#[derive(Default)]
pub struct FatalSignal {
    raised: AtomicBool,
    error: Mutex<Option<anyhow::Error>>,
}

impl FatalSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park an error. Only the first one is kept.
    pub fn raise(&self, err: anyhow::Error) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
        self.raised.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Extract the parked error, if any.
    pub fn take(&self) -> Option<anyhow::Error> {
        self.error.lock().take()
    }
}

/// The processing loop for one worker.
///
/// Receives batches from the bound channel until it is closed and drained,
/// dispatching each through the processor exactly once and demultiplexing
/// the returned observations into the shared recorder. Every batch is
/// acknowledged, including on failure and panic paths, so the scanner's
/// backpressure budget is never leaked.
///
/// Processor calls run under `catch_unwind`: a panic escaping the processor
/// would otherwise leave its batch unacknowledged and the scanner blocked
/// on the ack budget forever, with no way for the run to terminate. A caught
/// panic becomes a fatal error like any other unrecoverable dispatch
/// failure.
pub fn run_worker<P: Processor>(
    mut processor: P,
    worker_index: usize,
    total_workers: usize,
    channel: Arc<DuplexChannel>,
    recorder: Arc<StatRecorder>,
    do_load: bool,
    fatal: Arc<FatalSignal>,
) {
    match catch_unwind(AssertUnwindSafe(|| {
        processor.init(worker_index, total_workers)
    })) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(worker = worker_index, "worker setup failed: {:#}", err);
            fatal.raise(err);
            drain(&channel);
            return;
        }
        Err(payload) => {
            fatal.raise(panic_error(worker_index, payload));
            drain(&channel);
            return;
        }
    }

    debug!(worker = worker_index, "worker started");

    while let Some(batch) = channel.receive() {
        match catch_unwind(AssertUnwindSafe(|| processor.process_batch(batch, do_load))) {
            Ok(Ok(stat)) => record_stat(&recorder, &stat),
            Ok(Err(err)) => {
                error!(worker = worker_index, "batch dispatch failed: {:#}", err);
                fatal.raise(err);
                channel.ack();
                drain(&channel);
                return;
            }
            Err(payload) => {
                fatal.raise(panic_error(worker_index, payload));
                channel.ack();
                drain(&channel);
                return;
            }
        }
        channel.ack();
    }

    match catch_unwind(AssertUnwindSafe(|| processor.close(do_load))) {
        Ok(Ok(stat)) => record_stat(&recorder, &stat),
        Ok(Err(err)) => {
            error!(worker = worker_index, "worker close failed: {:#}", err);
            fatal.raise(err);
        }
        Err(payload) => {
            fatal.raise(panic_error(worker_index, payload));
        }
    }

    debug!(worker = worker_index, "worker finished");
}

/// Turn a caught panic payload into the run's fatal error.
fn panic_error(worker_index: usize, payload: Box<dyn Any + Send>) -> anyhow::Error {
    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    };
    error!(worker = worker_index, "worker panicked: {}", msg);
    anyhow!("worker {} panicked: {}", worker_index, msg)
}

/// Discard remaining batches after a fatal error so the scanner is never
/// left blocked on a channel nobody consumes.
fn drain(channel: &DuplexChannel) {
    while channel.receive().is_some() {
        channel.ack();
    }
}

fn record_stat(recorder: &StatRecorder, stat: &Stat) {
    for cmd_stat in stat.cmd_stats() {
        recorder.observe(cmd_stat);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchAccumulator;
    use crate::record::{CommandCategory, Record};
    use crate::stats::CmdStat;
    use anyhow::bail;

    fn record(n: u64) -> Record {
        Record {
            category: CommandCategory::Write,
            id: format!("r{}", n),
            command: "CMD".to_string(),
            args: vec![],
            tx_bytes: 4,
        }
    }

    fn sealed_batch(records: u64) -> Batch {
        let mut acc = BatchAccumulator::new(records as usize, 1);
        let mut out = None;
        for n in 0..records {
            out = acc.push(0, record(n));
        }
        out.expect("batch seals at size")
    }

    /// Counts batches and emits one fixed-latency stat per record.
    struct CountingProcessor {
        batches: usize,
        fail_batch: Option<usize>,
        initialized: bool,
        closed: bool,
    }

    impl CountingProcessor {
        fn new(fail_batch: Option<usize>) -> Self {
            Self {
                batches: 0,
                fail_batch,
                initialized: false,
                closed: false,
            }
        }
    }

    impl Processor for CountingProcessor {
        fn init(&mut self, _worker_index: usize, _total_workers: usize) -> Result<()> {
            self.initialized = true;
            Ok(())
        }

        fn process_batch(&mut self, batch: Batch, do_load: bool) -> Result<Stat> {
            self.batches += 1;
            if self.fail_batch == Some(self.batches) {
                bail!("injected dispatch failure");
            }
            let mut stat = Stat::default();
            if do_load {
                for r in batch.into_records() {
                    stat.push(CmdStat {
                        category: r.category,
                        latency_us: 150,
                        tx_bytes: r.tx_bytes,
                        rx_bytes: 0,
                    });
                }
            }
            Ok(stat)
        }

        fn close(&mut self, _do_load: bool) -> Result<Stat> {
            self.closed = true;
            Ok(Stat::default())
        }
    }

    #[test]
    fn test_worker_processes_all_batches() {
        let channel = Arc::new(DuplexChannel::new(4));
        let recorder = Arc::new(StatRecorder::new().unwrap());
        let fatal = Arc::new(FatalSignal::new());

        for _ in 0..3 {
            assert!(channel.send(sealed_batch(10)));
        }
        channel.close();

        run_worker(
            CountingProcessor::new(None),
            0,
            1,
            Arc::clone(&channel),
            Arc::clone(&recorder),
            true,
            Arc::clone(&fatal),
        );

        assert_eq!(recorder.total_ops(), 30);
        assert_eq!(recorder.cumulative_count(CommandCategory::Write), 30);
        assert_eq!(recorder.tx_total_bytes(), 120);
        assert!(!fatal.is_raised());
    }

    #[test]
    fn test_dry_run_produces_no_stats() {
        let channel = Arc::new(DuplexChannel::new(2));
        let recorder = Arc::new(StatRecorder::new().unwrap());
        let fatal = Arc::new(FatalSignal::new());

        assert!(channel.send(sealed_batch(10)));
        channel.close();

        run_worker(
            CountingProcessor::new(None),
            0,
            1,
            channel,
            Arc::clone(&recorder),
            false,
            fatal,
        );

        assert_eq!(recorder.total_ops(), 0);
    }

    #[test]
    fn test_fatal_error_raised_and_channel_drained() {
        let channel = Arc::new(DuplexChannel::new(4));
        let recorder = Arc::new(StatRecorder::new().unwrap());
        let fatal = Arc::new(FatalSignal::new());

        for _ in 0..4 {
            assert!(channel.send(sealed_batch(5)));
        }
        channel.close();

        run_worker(
            CountingProcessor::new(Some(2)),
            0,
            1,
            Arc::clone(&channel),
            Arc::clone(&recorder),
            true,
            Arc::clone(&fatal),
        );

        assert!(fatal.is_raised());
        let err = fatal.take().expect("error parked");
        assert!(err.to_string().contains("injected dispatch failure"));
        // Only the first batch produced stats; the rest were drained.
        assert_eq!(recorder.total_ops(), 5);
        assert!(channel.receive().is_none());
    }

    #[test]
    fn test_panicking_processor_becomes_fatal_and_channel_drains() {
        /// Panics while dispatching its second batch.
        struct PanickingProcessor {
            batches: usize,
        }

        impl Processor for PanickingProcessor {
            fn init(&mut self, _worker_index: usize, _total_workers: usize) -> Result<()> {
                Ok(())
            }

            fn process_batch(&mut self, _batch: Batch, _do_load: bool) -> Result<Stat> {
                self.batches += 1;
                if self.batches == 2 {
                    panic!("injected processor panic");
                }
                Ok(Stat::default())
            }
        }

        let channel = Arc::new(DuplexChannel::new(4));
        let recorder = Arc::new(StatRecorder::new().unwrap());
        let fatal = Arc::new(FatalSignal::new());

        for _ in 0..4 {
            assert!(channel.send(sealed_batch(5)));
        }
        channel.close();

        run_worker(
            PanickingProcessor { batches: 0 },
            0,
            1,
            Arc::clone(&channel),
            recorder,
            true,
            Arc::clone(&fatal),
        );

        // The panic surfaced as the run's fatal error and the remaining
        // batches were drained and acknowledged, not left in flight.
        assert!(fatal.is_raised());
        let err = fatal.take().expect("panic parked as error");
        assert!(err.to_string().contains("injected processor panic"));
        assert!(channel.receive().is_none());
        assert_eq!(channel.outstanding(), 0);
    }

    #[test]
    fn test_fatal_signal_keeps_first_error() {
        let fatal = FatalSignal::new();
        fatal.raise(anyhow::anyhow!("first"));
        fatal.raise(anyhow::anyhow!("second"));
        assert_eq!(fatal.take().unwrap().to_string(), "first");
    }
}
