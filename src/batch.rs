use crate::record::Record;

/// An ordered group of records assigned to exactly one worker partition.
///
/// A batch is mutable only while the scanner fills it; once sealed it moves
/// through a duplex channel into a worker and is dropped after processing.
/// Ownership transfer replaces object pooling here: there is no way to
/// observe a batch after the worker consumed it.
#[derive(Debug)]
pub struct Batch {
    partition: usize,
    records: Vec<Record>,
}

impl Batch {
    pub fn new(partition: usize, capacity: usize) -> Self {
        Self {
            partition,
            records: Vec::with_capacity(capacity),
        }
    }

    /// The worker partition this batch is routed to.
    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Consume the batch, yielding its records for dispatch.
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Deterministic partition assignment.
///
/// A pure function of the number of records emitted so far and the partition
/// count, so re-running with the same input and partition count reproduces
/// the exact record→partition assignment.
pub fn partition_for(records_emitted: u64, num_partitions: usize) -> usize {
    debug_assert!(num_partitions > 0);
    (records_emitted % num_partitions as u64) as usize
}

/// Accumulates records into per-partition open batches and seals each batch
/// once it reaches the configured size.
pub struct BatchAccumulator {
    batch_size: usize,
    open: Vec<Batch>,
}

impl BatchAccumulator {
    pub fn new(batch_size: usize, num_partitions: usize) -> Self {
        assert!(batch_size > 0, "batch size must be positive");
        assert!(num_partitions > 0, "need at least one partition");
        Self {
            batch_size,
            open: (0..num_partitions)
                .map(|p| Batch::new(p, batch_size))
                .collect(),
        }
    }

    pub fn num_partitions(&self) -> usize {
        self.open.len()
    }

    /// Append a record to the open batch of `partition`.
    ///
    /// Returns the sealed batch when it reaches the batch size; the caller is
    /// responsible for routing it to the matching channel.
    pub fn push(&mut self, partition: usize, record: Record) -> Option<Batch> {
        let slot = &mut self.open[partition];
        slot.records.push(record);
        if slot.records.len() >= self.batch_size {
            let sealed = std::mem::replace(slot, Batch::new(partition, self.batch_size));
            Some(sealed)
        } else {
            None
        }
    }

    /// Drain all non-empty partial batches at end of input.
    pub fn drain_partial(&mut self) -> Vec<Batch> {
        self.open
            .iter_mut()
            .filter(|b| !b.is_empty())
            .map(|slot| {
                let partition = slot.partition;
                std::mem::replace(slot, Batch::new(partition, 0))
            })
            .collect()
    }
}
