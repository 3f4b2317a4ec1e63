use crate::batch::Batch;
use crate::cli::BenchmarkConfig;
use crate::record::{CommandCategory, Record};
use crate::resp::RespClient;
use crate::stats::{CmdStat, Stat};
use crate::worker::Processor;
use anyhow::{Context, Result};
use std::time::Instant;
use tracing::{debug, warn};

/// One operation waiting in the outgoing pipeline buffer.
#[derive(Debug)]
pub struct PendingOp {
    pub category: CommandCategory,
    pub args: Vec<String>,
    pub tx_bytes: u64,
    pub enqueued_at: Instant,
}

impl PendingOp {
    pub fn from_record(record: Record) -> Self {
        let mut args = Vec::with_capacity(1 + record.args.len());
        args.push(record.command);
        args.extend(record.args);
        Self {
            category: record.category,
            args,
            tx_bytes: record.tx_bytes,
            enqueued_at: Instant::now(),
        }
    }
}

/// Accumulates outgoing operations up to the pipeline flush threshold.
///
/// Every operation flushed in one window is stamped with the same round-trip
/// completion time while keeping its individual enqueue time, so the latency
/// of each is `flush completion − its own enqueue`. Earlier-enqueued
/// operations in a window therefore report inflated latency relative to a
/// per-operation round trip; this matches how prior result sets were
/// measured and must not be changed without breaking comparability.
pub struct PipelineBuffer {
    threshold: usize,
    ops: Vec<PendingOp>,
}

impl PipelineBuffer {
    pub fn new(threshold: usize) -> Self {
        assert!(threshold > 0, "pipeline threshold must be positive");
        Self {
            threshold,
            ops: Vec::with_capacity(threshold),
        }
    }

    pub fn push(&mut self, op: PendingOp) {
        self.ops.push(op);
    }

    /// Whether the buffer has reached the flush threshold.
    pub fn is_full(&self) -> bool {
        self.ops.len() >= self.threshold
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Take the buffered window for dispatch, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<PendingOp> {
        std::mem::take(&mut self.ops)
    }

    /// Stamp a dispatched window with its shared completion time.
    pub fn complete(ops: Vec<PendingOp>, completed_at: Instant) -> Vec<CmdStat> {
        ops.into_iter()
            .map(|op| CmdStat {
                category: op.category,
                latency_us: completed_at
                    .saturating_duration_since(op.enqueued_at)
                    .as_micros() as u64,
                tx_bytes: op.tx_bytes,
                // Replies are drained off the socket but not measured, at
                // parity with historical result sets.
                rx_bytes: 0,
            })
            .collect()
    }
}

/// Processor dispatching batches to a RESP target with pipelined round
/// trips.
///
/// Operations below the flush threshold carry over between batches; the
/// worker's close hook flushes the remainder once its channel drains.
pub struct RedisProcessor {
    addr: String,
    continue_on_error: bool,
    cluster_mode: bool,
    debug_level: usize,
    client: Option<RespClient>,
    buffer: PipelineBuffer,
}

impl RedisProcessor {
    pub fn new(config: &BenchmarkConfig) -> Self {
        Self {
            addr: config.host.clone(),
            continue_on_error: config.continue_on_error,
            cluster_mode: config.cluster_mode,
            debug_level: config.debug,
            client: None,
            buffer: PipelineBuffer::new(config.pipeline),
        }
    }

    fn flush(&mut self, out: &mut Stat) -> Result<()> {
        let ops = self.buffer.take();
        if ops.is_empty() {
            return Ok(());
        }

        let client = self
            .client
            .as_mut()
            .context("processor used before init")?;
        let result = client.execute_pipeline(ops.iter().map(|op| op.args.as_slice()));
        let completed_at = Instant::now();

        if let Err(err) = result {
            if !self.continue_on_error {
                return Err(err).context("pipelined dispatch failed");
            }
            if self.debug_level > 0 {
                warn!("pipelined dispatch failed, continuing: {:#}", err);
            }
        }

        // Observations are recorded for the whole window even when the
        // round trip errored under continue-on-error, matching the
        // established accounting.
        out.extend(PipelineBuffer::complete(ops, completed_at));
        Ok(())
    }
}

impl Processor for RedisProcessor {
    fn init(&mut self, worker_index: usize, total_workers: usize) -> Result<()> {
        if self.cluster_mode {
            debug!(
                worker = worker_index,
                "cluster mode: addressing the cluster through {}", self.addr
            );
        }
        let client = RespClient::connect(&self.addr).with_context(|| {
            format!(
                "worker {}/{} cannot reach target {}",
                worker_index, total_workers, self.addr
            )
        })?;
        self.client = Some(client);
        Ok(())
    }

    fn process_batch(&mut self, batch: Batch, do_load: bool) -> Result<Stat> {
        let mut out = Stat::default();
        if !do_load {
            // Dry run: drain the batch to measure input read throughput.
            return Ok(out);
        }

        for record in batch.into_records() {
            self.buffer.push(PendingOp::from_record(record));
            if self.buffer.is_full() {
                self.flush(&mut out)?;
            }
        }
        Ok(out)
    }

    fn close(&mut self, do_load: bool) -> Result<Stat> {
        let mut out = Stat::default();
        if do_load && !self.buffer.is_empty() {
            self.flush(&mut out)?;
        }
        Ok(out)
    }
}
