//! Error types for the duplicate-marking pipeline

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MarkdupsError>;

#[derive(Error, Debug)]
pub enum MarkdupsError {
    #[error("no header lines detected")]
    NoHeader,

    #[error("singleton {0}: input does not appear to be qname grouped")]
    SingletonQname(String),

    #[error("no k in [1, 100] gives a false positive rate under {p} with {mem} bytes for {n} items")]
    InfeasibleFilterSize { n: u64, p: f64, mem: u64 },

    #[error("invalid memory size: {0}")]
    InvalidMemSize(String),

    #[error("invalid SAM record: {0}")]
    InvalidRecord(String),

    #[error("reference {0} not present in header")]
    UnknownReference(String),

    #[error("shared memory segment {name}: {source}")]
    SharedMemory {
        name: String,
        source: std::io::Error,
    },

    #[error("pipeline channel disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
