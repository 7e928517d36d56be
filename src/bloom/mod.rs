//! Shared-memory Bloom filter sized for billions of entries.
//!
//! One process creates the filter; any number of worker tasks attach to
//! the same bits through a [`BloomFilterConfig`] handle. The handle is
//! plain data (segment name plus sizing parameters), not a reference.
//!
//! Access is deliberately lock-free. Bit writes are monotone (0 to 1
//! only), so a racing reader can at worst miss a concurrent set and
//! report an item absent that another task just added. For duplicate
//! marking that costs one unmarked replicate per race, which is accepted;
//! locking the shared bits measured around 20x slower.

mod hashing;
mod shm;

pub use hashing::{HashFamily, MAX_HASHES};
pub use shm::SharedMemory;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{MarkdupsError, Result};

/// Segment names are unique per process and creation.
static SEGMENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Everything another task needs to attach to an existing filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BloomFilterConfig {
    /// Shared-memory segment holding the bit vector.
    pub shm_name: String,
    /// Target capacity in items.
    pub n: u64,
    /// Target false-positive rate at capacity.
    pub p: f64,
    /// Bit-vector size.
    pub m: u64,
    /// Number of hash functions.
    pub k: u32,
}

/// Optimal bit count m and hash count k for n items at false-positive
/// rate p.
pub fn optimal_m_k(n: u64, p: f64) -> (u64, u32) {
    let ln2 = std::f64::consts::LN_2;
    let m = (-(n as f64) * p.ln() / (ln2 * ln2)).ceil();
    let k = (ln2 * m / n as f64).ceil();
    (m as u64, k as u32)
}

/// Smallest k in [1, MAX_HASHES] that keeps the false-positive rate under
/// p when n items are stored in mem bytes, together with m = mem * 8.
///
/// Errors when no k in range meets the target.
pub fn m_k_within_memory(n: u64, p: f64, mem: u64) -> Result<(u64, u32)> {
    let m = mem.saturating_mul(8);
    if m == 0 {
        return Err(MarkdupsError::InfeasibleFilterSize { n, p, mem });
    }
    let mf = m as f64;
    for k in 1..=MAX_HASHES {
        // (1 - (1 - 1/m)^(k*n))^k, with the inner power taken through
        // ln_1p to keep precision for large m.
        let inner = ((k as f64) * (n as f64) * (-1.0 / mf).ln_1p()).exp();
        let fp = (1.0 - inner).powi(k as i32);
        if fp < p {
            return Ok((m, k));
        }
    }
    Err(MarkdupsError::InfeasibleFilterSize { n, p, mem })
}

/// A Bloom filter whose bit vector lives in named shared memory.
#[derive(Debug)]
pub struct BloomFilter {
    config: BloomFilterConfig,
    shm: SharedMemory,
    hasher: HashFamily,
}

impl BloomFilter {
    /// Create a filter sized with the minimum memory for n items at
    /// false-positive rate p.
    pub fn with_capacity(n: u64, p: f64) -> Result<Self> {
        let (m, k) = optimal_m_k(n, p);
        Self::create(n, p, m, k)
    }

    /// Create a filter capped at `mem` bytes of bit vector, choosing the
    /// smallest workable hash count.
    pub fn with_memory(n: u64, p: f64, mem: u64) -> Result<Self> {
        let (m, k) = m_k_within_memory(n, p, mem)?;
        Self::create(n, p, m, k)
    }

    fn create(n: u64, p: f64, m: u64, k: u32) -> Result<Self> {
        let shm_name = format!(
            "/markdups-{}-{}",
            std::process::id(),
            SEGMENT_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let bytes = (m as usize + 7) / 8;
        let shm = SharedMemory::create(&shm_name, bytes)?;
        let config = BloomFilterConfig {
            shm_name,
            n,
            p,
            m,
            k,
        };
        tracing::debug!(m, k, bytes, "bloom filter created");
        Ok(Self {
            hasher: HashFamily::new(m, k),
            shm,
            config,
        })
    }

    /// Attach to the bits of an existing filter. Does not re-zero.
    pub fn attach(config: &BloomFilterConfig) -> Result<Self> {
        let shm = SharedMemory::attach(&config.shm_name)?;
        Ok(Self {
            hasher: HashFamily::new(config.m, config.k),
            shm,
            config: config.clone(),
        })
    }

    /// Add an item. Returns true iff at least one bit flipped, i.e. the
    /// item was not already present (up to the false-positive rate).
    pub fn add(&self, item: &[u8]) -> bool {
        let bits = self.shm.as_atomic_bytes();
        let mut added = false;
        for pos in self.hasher.positions(item) {
            let byte = (pos / 8) as usize;
            let mask = 1u8 << (pos % 8);
            // Read first: the common already-set case then skips the RMW.
            if bits[byte].load(Ordering::Relaxed) & mask == 0 {
                bits[byte].fetch_or(mask, Ordering::Relaxed);
                added = true;
            }
        }
        added
    }

    /// Membership test. True iff every probed bit is set.
    pub fn contains(&self, item: &[u8]) -> bool {
        let bits = self.shm.as_atomic_bytes();
        self.hasher.positions(item).all(|pos| {
            let byte = (pos / 8) as usize;
            let mask = 1u8 << (pos % 8);
            bits[byte].load(Ordering::Relaxed) & mask != 0
        })
    }

    /// Approximate number of distinct items stored, from the set-bit
    /// count (Swamidass & Baldi 2007).
    pub fn count(&self) -> u64 {
        let set: u64 = self
            .shm
            .as_atomic_bytes()
            .iter()
            .map(|b| b.load(Ordering::Relaxed).count_ones() as u64)
            .sum();
        if set == 0 {
            return 0;
        }
        let m = self.config.m as f64;
        let k = self.config.k as f64;
        ((-m / k) * (1.0 - set as f64 / m).ln()).ceil() as u64
    }

    /// Handle for attaching other tasks to the same bits.
    pub fn handle(&self) -> BloomFilterConfig {
        self.config.clone()
    }

    /// Bit-vector size in bytes.
    pub fn mem_bytes(&self) -> usize {
        self.shm.len()
    }
}
