//! Input segmentation: header passthrough and qname grouping.
//!
//! A single reader task owns the input stream. Header lines are written
//! straight to the output descriptor and handed to every worker once;
//! alignment lines are grouped by qname, the groups batched, and the
//! batches pushed onto the bounded work channel. The channel bound is
//! the pipeline's backpressure: a full queue blocks the reader until
//! workers catch up.

use std::io::BufRead;

use crossbeam_channel::Sender;

use crate::error::{MarkdupsError, Result};
use crate::pipeline::output::OutputFd;

/// All records sharing a qname, in input order.
pub type QnameGroup = Vec<String>;

/// Work channel payload. One `Stop` per worker terminates the pipeline.
pub enum WorkItem {
    Batch(Vec<QnameGroup>),
    Stop,
}

/// Groups per batch on the work channel.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Run the reader until EOF or error.
///
/// The stop sentinels are delivered on every exit path, including
/// errors, so blocked workers always drain and join.
pub fn read_groups<R: BufRead>(
    input: R,
    out: OutputFd,
    header_tx: &Sender<String>,
    work_tx: &Sender<WorkItem>,
    nconsumers: usize,
    batch_size: usize,
) -> Result<()> {
    let result = pump(input, out, header_tx, work_tx, nconsumers, batch_size);
    if result.is_err() {
        // Workers that never got a header are still parked on the header
        // channel; unblock them so the sentinels can reach them.
        for _ in 0..nconsumers {
            let _ = header_tx.try_send(String::new());
        }
    }
    for _ in 0..nconsumers {
        let _ = work_tx.send(WorkItem::Stop);
    }
    result
}

fn pump<R: BufRead>(
    input: R,
    out: OutputFd,
    header_tx: &Sender<String>,
    work_tx: &Sender<WorkItem>,
    nconsumers: usize,
    batch_size: usize,
) -> Result<()> {
    let mut headlines = String::new();
    let mut header_sent = false;
    let mut groupid: Option<String> = None;
    let mut group: QnameGroup = Vec::new();
    let mut batch: Vec<QnameGroup> = Vec::new();

    for line in input.lines() {
        let line = line?;
        if line.starts_with('@') {
            headlines.push_str(&line);
            headlines.push('\n');
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
            continue;
        }

        if !header_sent {
            if headlines.is_empty() {
                return Err(MarkdupsError::NoHeader);
            }
            send_header(header_tx, &headlines, nconsumers)?;
            header_sent = true;
        }

        let qname_end = line.find('\t').unwrap_or(line.len());
        if groupid.as_deref() == Some(&line[..qname_end]) {
            group.push(line);
        } else {
            let next = line[..qname_end].to_string();
            flush_group(&mut group, &groupid, &mut batch, work_tx, batch_size)?;
            groupid = Some(next);
            group.push(line);
        }
    }

    if headlines.is_empty() {
        return Err(MarkdupsError::NoHeader);
    }
    if !header_sent {
        // Header-only input: workers still block on the header channel
        // before they can see the sentinels.
        send_header(header_tx, &headlines, nconsumers)?;
    }

    flush_group(&mut group, &groupid, &mut batch, work_tx, batch_size)?;
    if !batch.is_empty() {
        work_tx
            .send(WorkItem::Batch(batch))
            .map_err(|_| MarkdupsError::Disconnected)?;
    }
    Ok(())
}

fn send_header(header_tx: &Sender<String>, headlines: &str, nconsumers: usize) -> Result<()> {
    for _ in 0..nconsumers {
        header_tx
            .send(headlines.to_string())
            .map_err(|_| MarkdupsError::Disconnected)?;
    }
    Ok(())
}

/// Move the completed group into the batch, pushing the batch when full.
///
/// A completed group of one record means the input is not qname grouped;
/// the error names that record's qname.
fn flush_group(
    group: &mut QnameGroup,
    groupid: &Option<String>,
    batch: &mut Vec<QnameGroup>,
    work_tx: &Sender<WorkItem>,
    batch_size: usize,
) -> Result<()> {
    if group.is_empty() {
        return Ok(());
    }
    if group.len() == 1 {
        return Err(MarkdupsError::SingletonQname(
            groupid.clone().unwrap_or_default(),
        ));
    }
    batch.push(std::mem::take(group));
    if batch.len() == batch_size {
        work_tx
            .send(WorkItem::Batch(std::mem::take(batch)))
            .map_err(|_| MarkdupsError::Disconnected)?;
    }
    Ok(())
}
