//! Single-pass duplicate marking for qname-grouped SAM streams.
//!
//! Reads SAM text, marks PCR/optical replicates with the 0x400 flag, and
//! streams the records back out. Membership state lives in a Bloom
//! filter over named shared memory, so memory stays bounded at
//! whole-genome scale and every worker task probes the same bits without
//! locks.
//!
//! Input must be qname grouped and paired. Output preserves the header
//! and every record byte-for-byte except the flag field; record groups
//! are emitted atomically but in no particular order across groups.

pub mod bloom;
pub mod error;
pub mod pipeline;
pub mod sam;

pub use bloom::{BloomFilter, BloomFilterConfig};
pub use error::{MarkdupsError, Result};
pub use pipeline::{OutputFd, PipelineConfig, Summary};
