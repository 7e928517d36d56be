//! Worker task: fingerprint groups, mark replicates, emit records.
//!
//! Each worker attaches to the shared filter, takes one copy of the
//! header, then drains batches until its stop sentinel arrives. A group
//! is serialized and written as one block so its records stay contiguous
//! in the output regardless of how many workers are writing.

use crossbeam_channel::Receiver;

use crate::bloom::{BloomFilter, BloomFilterConfig};
use crate::error::{MarkdupsError, Result};
use crate::pipeline::output::OutputFd;
use crate::pipeline::reader::{QnameGroup, WorkItem};
use crate::sam::ends::{template_ends, UNMAPPED};
use crate::sam::{Record, SamHeader};

/// Per-worker tallies, summed by the coordinator.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkerCounts {
    pub qnames: u64,
    pub alignments: u64,
    pub duplicates: u64,
}

/// Run one worker to completion.
///
/// On failure the worker keeps draining the work channel to its stop
/// sentinel before returning, so the reader is never wedged against a
/// full queue behind a dead consumer.
pub fn mark_duplicates(
    bf_config: &BloomFilterConfig,
    header_rx: &Receiver<String>,
    work_rx: &Receiver<WorkItem>,
    out: OutputFd,
) -> Result<WorkerCounts> {
    let mut counts = WorkerCounts::default();
    let result = consume(bf_config, header_rx, work_rx, out, &mut counts);
    if result.is_err() {
        while let Ok(item) = work_rx.recv() {
            if matches!(item, WorkItem::Stop) {
                break;
            }
        }
    }
    result.map(|_| counts)
}

fn consume(
    bf_config: &BloomFilterConfig,
    header_rx: &Receiver<String>,
    work_rx: &Receiver<WorkItem>,
    out: OutputFd,
    counts: &mut WorkerCounts,
) -> Result<()> {
    let filter = BloomFilter::attach(bf_config)?;
    let header_text = header_rx.recv().map_err(|_| MarkdupsError::Disconnected)?;
    let header = SamHeader::from_text(&header_text);

    loop {
        match work_rx.recv().map_err(|_| MarkdupsError::Disconnected)? {
            WorkItem::Stop => return Ok(()),
            WorkItem::Batch(batch) => process_batch(&filter, &header, batch, out, counts)?,
        }
    }
}

fn process_batch(
    filter: &BloomFilter,
    header: &SamHeader,
    batch: Vec<QnameGroup>,
    out: OutputFd,
    counts: &mut WorkerCounts,
) -> Result<()> {
    for group in batch {
        counts.qnames += 1;
        counts.alignments += group.len() as u64;

        let mut alignments = group
            .iter()
            .map(|line| Record::from_sam_line(line, header))
            .collect::<Result<Vec<_>>>()?;

        if let Some(ends) = template_ends(&alignments) {
            if ends[1] == UNMAPPED {
                // One mapped end only. Key on it alone, and as in Picard,
                // mark just the mapped reads of a replicate group.
                if !filter.add(ends[0].to_string().as_bytes()) {
                    for rec in alignments.iter_mut().filter(|r| r.is_mapped()) {
                        rec.set_duplicate();
                        counts.duplicates += 1;
                    }
                }
            } else {
                let key = format!("{}{}", ends[0], ends[1]);
                if !filter.add(key.as_bytes()) {
                    counts.duplicates += alignments.len() as u64;
                    for rec in alignments.iter_mut() {
                        rec.set_duplicate();
                    }
                }
            }
        }

        let mut block = String::new();
        for rec in &alignments {
            block.push_str(&rec.to_sam());
            block.push('\n');
        }
        out.write_all(block.as_bytes())?;
    }
    Ok(())
}
