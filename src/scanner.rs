use crate::batch::{partition_for, BatchAccumulator};
use crate::channel::DuplexChannel;
use crate::record::decode_record;
use crate::worker::FatalSignal;
use anyhow::{Context, Result};
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, warn};

/// The production loop: reads records from the input source, assigns each a
/// partition, accumulates per-partition batches, and enqueues sealed
/// batches onto the matching duplex channel.
///
/// Returns the number of records emitted. Every channel is closed on every
/// exit path, so workers always drain and terminate.
///
/// Malformed records are skipped with a warning; an I/O error on the input
/// stream is unrecoverable and aborts the scan.
pub fn scan<R: Read>(
    input: R,
    batch_size: usize,
    limit: u64,
    channels: &[Arc<DuplexChannel>],
    fatal: &FatalSignal,
) -> Result<u64> {
    let result = scan_inner(input, batch_size, limit, channels, fatal);
    for channel in channels {
        channel.close();
    }
    result
}

fn scan_inner<R: Read>(
    input: R,
    batch_size: usize,
    limit: u64,
    channels: &[Arc<DuplexChannel>],
    fatal: &FatalSignal,
) -> Result<u64> {
    let num_partitions = channels.len();
    let mut accumulator = BatchAccumulator::new(batch_size, num_partitions);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);

    let mut emitted: u64 = 0;
    let mut skipped: u64 = 0;

    for row in reader.records() {
        if fatal.is_raised() {
            debug!("fatal signal raised, stopping scan early");
            break;
        }
        if limit > 0 && emitted >= limit {
            break;
        }

        let fields = match row {
            Ok(fields) => fields,
            Err(err) if err.is_io_error() => {
                return Err(err).context("cannot read from input source");
            }
            Err(err) => {
                skipped += 1;
                warn!("skipping unparseable input row: {}", err);
                continue;
            }
        };

        let record = match decode_record(&fields) {
            Ok(record) => record,
            Err(err) => {
                skipped += 1;
                warn!("skipping malformed record: {}", err);
                continue;
            }
        };

        let partition = partition_for(emitted, num_partitions);
        emitted += 1;

        if let Some(sealed) = accumulator.push(partition, record) {
            // Blocks while the channel's backpressure budget is exhausted;
            // this is the system's only flow control.
            channels[partition].send(sealed);
        }
    }

    // End of input: flush partial batches before the channels close.
    for partial in accumulator.drain_partial() {
        let partition = partial.partition();
        channels[partition].send(partial);
    }

    if skipped > 0 {
        warn!(skipped, "records were skipped during the scan");
    }
    debug!(emitted, "scan complete");
    Ok(emitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CommandCategory;
    use std::io::Cursor;

    fn input_of(n: usize) -> String {
        (0..n)
            .map(|i| format!("WRITE,doc-{},FT.ADD,idx1,doc:{},1.0\n", i, i))
            .collect()
    }

    fn channels(partitions: usize, capacity: usize) -> Vec<Arc<DuplexChannel>> {
        (0..partitions)
            .map(|_| Arc::new(DuplexChannel::new(capacity)))
            .collect()
    }

    /// Drain one channel on a thread, returning the record ids seen.
    fn drain_ids(channel: Arc<DuplexChannel>) -> std::thread::JoinHandle<Vec<String>> {
        std::thread::spawn(move || {
            let mut ids = Vec::new();
            while let Some(batch) = channel.receive() {
                for record in batch.into_records() {
                    ids.push(record.id);
                }
                channel.ack();
            }
            ids
        })
    }

    #[test]
    fn test_scan_emits_all_records() {
        let chans = channels(2, 8);
        let consumers: Vec<_> = chans.iter().cloned().map(drain_ids).collect();
        let fatal = FatalSignal::new();

        let emitted = scan(Cursor::new(input_of(100)), 10, 0, &chans, &fatal).unwrap();
        assert_eq!(emitted, 100);

        let mut seen: Vec<String> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        seen.sort();
        let mut expected: Vec<String> = (0..100).map(|i| format!("doc-{}", i)).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_scan_respects_limit() {
        let chans = channels(1, 8);
        let consumer = drain_ids(Arc::clone(&chans[0]));
        let fatal = FatalSignal::new();

        let emitted = scan(Cursor::new(input_of(100)), 10, 25, &chans, &fatal).unwrap();
        assert_eq!(emitted, 25);
        assert_eq!(consumer.join().unwrap().len(), 25);
    }

    #[test]
    fn test_scan_flushes_partial_batches() {
        let chans = channels(1, 8);
        let consumer = {
            let channel = Arc::clone(&chans[0]);
            std::thread::spawn(move || {
                let mut sizes = Vec::new();
                while let Some(batch) = channel.receive() {
                    sizes.push(batch.len());
                    channel.ack();
                }
                sizes
            })
        };
        let fatal = FatalSignal::new();

        // 23 records at batch size 10: two full batches and one short.
        scan(Cursor::new(input_of(23)), 10, 0, &chans, &fatal).unwrap();
        assert_eq!(consumer.join().unwrap(), vec![10, 10, 3]);
    }

    #[test]
    fn test_scan_skips_malformed_rows() {
        let input = "WRITE,a,CMD\nBOGUS,b,CMD\nWRITE,c\nWRITE,d,CMD\n";
        let chans = channels(1, 8);
        let consumer = drain_ids(Arc::clone(&chans[0]));
        let fatal = FatalSignal::new();

        let emitted = scan(Cursor::new(input), 10, 0, &chans, &fatal).unwrap();
        assert_eq!(emitted, 2);
        assert_eq!(consumer.join().unwrap(), vec!["a", "d"]);
    }

    #[test]
    fn test_partition_assignment_reproducible() {
        // Two identical scans must produce the same per-partition split.
        let run = || {
            let chans = channels(3, 16);
            let consumers: Vec<_> = chans.iter().cloned().map(drain_ids).collect();
            let fatal = FatalSignal::new();
            scan(Cursor::new(input_of(90)), 7, 0, &chans, &fatal).unwrap();
            consumers
                .into_iter()
                .map(|c| c.join().unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_scan_stops_on_fatal_signal() {
        let chans = channels(1, 8);
        let consumer = drain_ids(Arc::clone(&chans[0]));
        let fatal = FatalSignal::new();
        fatal.raise(anyhow::anyhow!("boom"));

        let emitted = scan(Cursor::new(input_of(100)), 10, 0, &chans, &fatal).unwrap();
        assert_eq!(emitted, 0);
        assert!(consumer.join().unwrap().is_empty());
    }

    #[test]
    fn test_scan_closes_channels_at_eof() {
        let chans = channels(2, 8);
        let fatal = FatalSignal::new();
        scan(Cursor::new(String::new()), 10, 0, &chans, &fatal).unwrap();
        for channel in &chans {
            assert!(channel.receive().is_none());
        }
    }

    #[test]
    fn test_scan_decodes_categories() {
        let input = "READ,q,FT.SEARCH,idx1,hello\nDELETE,d,FT.DEL,idx1,doc:1\n";
        let chans = channels(1, 8);
        let consumer = {
            let channel = Arc::clone(&chans[0]);
            std::thread::spawn(move || {
                let mut categories = Vec::new();
                while let Some(batch) = channel.receive() {
                    for record in batch.into_records() {
                        categories.push(record.category);
                    }
                    channel.ack();
                }
                categories
            })
        };
        let fatal = FatalSignal::new();
        scan(Cursor::new(input), 10, 0, &chans, &fatal).unwrap();
        assert_eq!(
            consumer.join().unwrap(),
            vec![CommandCategory::Read, CommandCategory::Delete]
        );
    }
}
