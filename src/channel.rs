use crate::batch::Batch;
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A bounded bidirectional queue pairing the scanner with one or more
/// workers.
///
/// The forward direction carries sealed batches; the reverse direction
/// carries per-batch acknowledgments. The scanner may have at most
/// `capacity` unacknowledged batches outstanding at any time, which is the
/// system's only flow-control mechanism.
///
/// Many workers may share one channel (many-to-one). Batch ordering is then
/// only guaranteed per enqueue order, not per completion order.
pub struct DuplexChannel {
    to_worker_tx: Mutex<Option<Sender<Batch>>>,
    to_worker_rx: Receiver<Batch>,
    ack_tx: Sender<()>,
    ack_rx: Receiver<()>,
    outstanding: AtomicUsize,
    capacity: usize,
}

impl DuplexChannel {
    /// Create a channel with the given backpressure budget.
    ///
    /// The acknowledgment queue has the same capacity as the batch queue, so
    /// a worker ack can never block: there are never more pending acks than
    /// outstanding batches.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be positive");
        let (to_worker_tx, to_worker_rx) = bounded(capacity);
        let (ack_tx, ack_rx) = bounded(capacity);
        Self {
            to_worker_tx: Mutex::new(Some(to_worker_tx)),
            to_worker_rx,
            ack_tx,
            ack_rx,
            outstanding: AtomicUsize::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue a sealed batch toward the workers.
    ///
    /// Blocks while the backpressure budget is exhausted, waiting for a
    /// worker acknowledgment before enqueueing more. Only the scanner calls
    /// this; returns `false` if the channel was already closed.
    pub fn send(&self, batch: Batch) -> bool {
        if self.outstanding.load(Ordering::Acquire) >= self.capacity {
            // One ack frees exactly one slot of budget. A disconnected ack
            // queue means every worker on this channel is gone.
            if self.ack_rx.recv().is_err() {
                return false;
            }
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
        }

        let guard = self.to_worker_tx.lock();
        match guard.as_ref() {
            Some(tx) if tx.send(batch).is_ok() => {
                self.outstanding.fetch_add(1, Ordering::AcqRel);
                true
            }
            _ => false,
        }
    }

    /// Dequeue the next batch.
    ///
    /// Blocks while the queue is empty and not yet closed. Returns `None`
    /// once the channel is closed and fully drained.
    pub fn receive(&self) -> Option<Batch> {
        self.to_worker_rx.recv().ok()
    }

    /// Signal completion of one batch, freeing one slot of backpressure
    /// budget.
    pub fn ack(&self) {
        // Capacity bounds pending acks at `capacity`, so this never blocks.
        let _ = self.ack_tx.try_send(());
    }

    /// Close the channel. Safe to call more than once.
    ///
    /// Workers continue draining already-enqueued batches; nothing in flight
    /// is dropped.
    pub fn close(&self) {
        self.to_worker_tx.lock().take();
    }

    /// Number of unacknowledged batches currently outstanding.
    ///
    /// Exposed for backpressure assertions; only advisory under concurrency.
    pub fn outstanding(&self) -> usize {
        // Acks sitting in the queue have been issued but not yet consumed by
        // the scanner, so they no longer count against the budget.
        self.outstanding
            .load(Ordering::Acquire)
            .saturating_sub(self.ack_rx.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CommandCategory, Record};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    fn batch(partition: usize) -> Batch {
        let mut acc = crate::batch::BatchAccumulator::new(1, partition + 1);
        acc.push(
            partition,
            Record {
                category: CommandCategory::Write,
                id: "r".to_string(),
                command: "CMD".to_string(),
                args: vec![],
                tx_bytes: 1,
            },
        )
        .expect("batch size 1 seals immediately")
    }

    #[test]
    fn test_fifo_order_preserved() {
        let ch = DuplexChannel::new(4);
        for p in 0..3 {
            assert!(ch.send(batch(p)));
        }
        for p in 0..3 {
            let received = ch.receive().unwrap();
            assert_eq!(received.partition(), p);
            ch.ack();
        }
    }

    #[test]
    fn test_close_allows_draining() {
        let ch = DuplexChannel::new(4);
        assert!(ch.send(batch(0)));
        assert!(ch.send(batch(1)));
        ch.close();
        ch.close(); // idempotent

        assert!(ch.receive().is_some());
        assert!(ch.receive().is_some());
        assert!(ch.receive().is_none());
    }

    #[test]
    fn test_send_after_close_fails() {
        let ch = DuplexChannel::new(2);
        ch.close();
        assert!(!ch.send(batch(0)));
    }

    #[test]
    fn test_backpressure_blocks_at_capacity() {
        let ch = Arc::new(DuplexChannel::new(2));
        assert!(ch.send(batch(0)));
        assert!(ch.send(batch(0)));

        let sent_third = Arc::new(AtomicBool::new(false));
        let producer = {
            let ch = Arc::clone(&ch);
            let sent_third = Arc::clone(&sent_third);
            std::thread::spawn(move || {
                assert!(ch.send(batch(0)));
                sent_third.store(true, Ordering::SeqCst);
            })
        };

        // The budget is exhausted, so the third send must be blocked.
        std::thread::sleep(Duration::from_millis(100));
        assert!(!sent_third.load(Ordering::SeqCst));
        assert!(ch.outstanding() <= 2);

        // One receive+ack frees one slot and unblocks the producer.
        let b = ch.receive().unwrap();
        drop(b);
        ch.ack();
        producer.join().unwrap();
        assert!(sent_third.load(Ordering::SeqCst));

        // The bound held throughout.
        assert!(ch.outstanding() <= 2);
    }

    #[test]
    fn test_outstanding_never_exceeds_capacity() {
        let ch = Arc::new(DuplexChannel::new(3));
        let consumer = {
            let ch = Arc::clone(&ch);
            std::thread::spawn(move || {
                let mut seen = 0;
                while let Some(b) = ch.receive() {
                    assert!(ch.outstanding() <= ch.capacity());
                    drop(b);
                    ch.ack();
                    seen += 1;
                }
                seen
            })
        };

        for _ in 0..50 {
            assert!(ch.send(batch(0)));
            assert!(ch.outstanding() <= ch.capacity());
        }
        ch.close();
        assert_eq!(consumer.join().unwrap(), 50);
    }
}
