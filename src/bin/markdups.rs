//! markdups: mark duplicates in a qname-grouped SAM stream.
//!
//! Reads SAM from stdin (or --input), writes the same records to stdout
//! (or --output) with the duplicate flag set on replicates. Only paired
//! input is handled. Log verbosity comes from the LOG_LEVEL environment
//! variable, default INFO.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use sysinfo::System;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use markdups::bloom;
use markdups::error::MarkdupsError;
use markdups::pipeline::{
    self, OutputFd, PipelineConfig, DEFAULT_BATCH_SIZE, DEFAULT_FPRATE, DEFAULT_NITEMS,
    DEFAULT_NWORKERS, DEFAULT_QUEUE_SIZE,
};

#[derive(Parser, Debug)]
#[command(name = "markdups", version, about = "Mark duplicates in a qname-grouped SAM stream")]
struct Cli {
    /// Input SAM file. If not supplied, default is STDIN.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output SAM file. If not supplied, default is STDOUT.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Expected maximum number of read pairs n.
    #[arg(short = 'n', long, default_value_t = DEFAULT_NITEMS)]
    n_items: u64,

    /// Target maximum false positive rate when n items are stored.
    #[arg(short = 'p', long, default_value_t = DEFAULT_FPRATE)]
    fp_rate: f64,

    /// Cap filter memory at SIZE (e.g. 32GiB, 500M), picking the
    /// smallest workable number of hash functions.
    #[arg(long, value_name = "SIZE")]
    mem: Option<String>,

    /// Number of hashing processes.
    #[arg(long, default_value_t = DEFAULT_NWORKERS)]
    consumer_processes: usize,

    /// Size of the SAM record queue.
    #[arg(long, default_value_t = DEFAULT_QUEUE_SIZE)]
    queue_size: usize,

    /// Print approximate memory requirement in GB for n items and
    /// target maximum false positive rate p, then exit.
    #[arg(long, num_args = 2, value_names = ["N_ITEMS", "FP_RATE"])]
    mem_calc: Option<Vec<f64>>,
}

/// Parse a human-friendly byte quantity: plain bytes, or a K/M/G/T
/// prefix with optional B/iB, case-insensitive, binary multiples.
fn parse_mem_size(text: &str) -> Result<u64, MarkdupsError> {
    let raw = text.trim();
    let upper = raw.to_ascii_uppercase();
    let numeric: String = upper
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let suffix = upper[numeric.len()..].trim_start();
    let value: f64 = numeric
        .parse()
        .map_err(|_| MarkdupsError::InvalidMemSize(raw.to_string()))?;
    let mult: u64 = match suffix {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        "T" | "TB" | "TIB" => 1 << 40,
        _ => return Err(MarkdupsError::InvalidMemSize(raw.to_string())),
    };
    let bytes = value * mult as f64;
    if bytes < 1.0 {
        return Err(MarkdupsError::InvalidMemSize(raw.to_string()));
    }
    Ok(bytes as u64)
}

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("LOG_LEVEL")
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Warn up front when the filter will not fit in available memory,
/// rather than letting the first page faults thrash.
fn warn_if_memory_tight(filter_bytes: u64) {
    let mut sys = System::new();
    sys.refresh_memory();
    let available = sys.available_memory();
    if filter_bytes > available {
        warn!(
            "filter needs {} bytes but only {} are available",
            filter_bytes, available
        );
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    if let Some(args) = &cli.mem_calc {
        let (m, _) = bloom::optimal_m_k(args[0] as u64, args[1]);
        println!("{:.3}GB", m as f64 / 8.0 / 1024f64.powi(3));
        return Ok(());
    }

    info!("markdups version {}", env!("CARGO_PKG_VERSION"));
    info!(
        "{}",
        std::env::args().collect::<Vec<_>>().join(" ")
    );

    let mem = cli.mem.as_deref().map(parse_mem_size).transpose()?;
    let config = PipelineConfig {
        n_items: cli.n_items,
        fp_rate: cli.fp_rate,
        mem,
        nconsumers: cli.consumer_processes,
        queue_size: cli.queue_size,
        batch_size: DEFAULT_BATCH_SIZE,
    };

    let filter_bytes = match config.mem {
        Some(mem) => mem,
        None => bloom::optimal_m_k(config.n_items, config.fp_rate).0 / 8,
    };
    warn_if_memory_tight(filter_bytes);

    let input: Box<dyn BufRead + Send> = match &cli.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let output = cli
        .output
        .as_ref()
        .map(|path| {
            File::create(path).with_context(|| format!("creating {}", path.display()))
        })
        .transpose()?;
    let out_fd = output
        .as_ref()
        .map(|f| f.as_raw_fd())
        .unwrap_or(libc::STDOUT_FILENO);

    let summary = pipeline::run(input, OutputFd::new(out_fd), &config)?;

    info!(
        "approximate n of stored items (templates + read ends): {}",
        summary.templates_stored
    );
    info!("qnames seen: {}", summary.qnames);
    info!("alignments seen: {}", summary.alignments);
    info!("duplicates marked: {}", summary.duplicates);
    info!("duplicate fraction: {:.4}", summary.duplicate_fraction());
    Ok(())
}
