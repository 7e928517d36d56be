//! The streaming pipeline: one reader, N workers, shared filter.
//!
//! The coordinator creates the shared-memory filter, wires the header
//! and work channels, runs reader and workers on scoped threads, then
//! sums the per-worker counters into a [`Summary`].
//!
//! Ordering guarantees, and their limits:
//! - header bytes reach the output before any record bytes
//! - each qname group is contiguous and in input order
//! - groups are interleaved across workers nondeterministically;
//!   consumers must not rely on record order beyond the group

pub mod output;
pub mod reader;
pub mod worker;

pub use output::OutputFd;
pub use reader::DEFAULT_BATCH_SIZE;
pub use worker::WorkerCounts;

use std::io::BufRead;
use std::thread;

use crossbeam_channel::bounded;

use crate::bloom::BloomFilter;
use crate::error::Result;

pub const DEFAULT_NITEMS: u64 = 1_000_000_000;
pub const DEFAULT_FPRATE: f64 = 1e-6;
pub const DEFAULT_NWORKERS: usize = 8;
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Expected maximum number of read pairs.
    pub n_items: u64,
    /// Target false-positive rate at capacity.
    pub fp_rate: f64,
    /// Cap the filter at this many bytes instead of minimum-memory
    /// sizing.
    pub mem: Option<u64>,
    /// Number of worker tasks.
    pub nconsumers: usize,
    /// Bound of the work channel, in batches.
    pub queue_size: usize,
    /// Groups per batch.
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            n_items: DEFAULT_NITEMS,
            fp_rate: DEFAULT_FPRATE,
            mem: None,
            nconsumers: DEFAULT_NWORKERS,
            queue_size: DEFAULT_QUEUE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Aggregated run statistics.
#[derive(Debug, Clone, Copy)]
pub struct Summary {
    /// Approximate distinct items stored (templates + single read ends).
    pub templates_stored: u64,
    pub qnames: u64,
    pub alignments: u64,
    pub duplicates: u64,
}

impl Summary {
    pub fn duplicate_fraction(&self) -> f64 {
        if self.alignments == 0 {
            0.0
        } else {
            self.duplicates as f64 / self.alignments as f64
        }
    }
}

/// Run the full pipeline over `input`, writing marked records to `out`.
///
/// Blocks until EOF has propagated through every worker. The filter's
/// shared-memory segment lives exactly as long as this call.
pub fn run<R>(input: R, out: OutputFd, config: &PipelineConfig) -> Result<Summary>
where
    R: BufRead + Send,
{
    let filter = match config.mem {
        Some(mem) => BloomFilter::with_memory(config.n_items, config.fp_rate, mem)?,
        None => BloomFilter::with_capacity(config.n_items, config.fp_rate)?,
    };
    let bf_config = filter.handle();

    let (header_tx, header_rx) = bounded::<String>(config.nconsumers);
    let (work_tx, work_rx) = bounded::<reader::WorkItem>(config.queue_size);

    let (reader_result, worker_results) = thread::scope(|scope| {
        let header_tx = &header_tx;
        let work_tx = &work_tx;
        let bf_config = &bf_config;

        let reader_handle = scope.spawn(move || {
            reader::read_groups(
                input,
                out,
                header_tx,
                work_tx,
                config.nconsumers,
                config.batch_size,
            )
        });

        let worker_handles: Vec<_> = (0..config.nconsumers)
            .map(|_| {
                let header_rx = header_rx.clone();
                let work_rx = work_rx.clone();
                scope.spawn(move || {
                    worker::mark_duplicates(bf_config, &header_rx, &work_rx, out)
                })
            })
            .collect();

        let worker_results: Vec<Result<WorkerCounts>> = worker_handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect();
        let reader_result = reader_handle
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
        (reader_result, worker_results)
    });

    // Reader failures (missing header, ungrouped input) are the root
    // cause when both sides error, so they win.
    reader_result?;

    let mut qnames = 0;
    let mut alignments = 0;
    let mut duplicates = 0;
    for result in worker_results {
        let counts = result?;
        qnames += counts.qnames;
        alignments += counts.alignments;
        duplicates += counts.duplicates;
    }

    Ok(Summary {
        templates_stored: filter.count(),
        qnames,
        alignments,
        duplicates,
    })
}
