//! Fragment end extraction.
//!
//! The fingerprint of a read pair is the coordinate-sorted pair of its
//! unclipped 5' fragment ends. Soft-clipped bases are added back so two
//! reads from the same fragment land on the same coordinate even when
//! the aligner trimmed them differently.

use std::fmt;

use super::{Record, CIGAR_SOFT_CLIP};

/// Strand of a fragment end. `None` is reserved for the unmapped
/// sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Orientation {
    None,
    Forward,
    Reverse,
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::None => Ok(()),
            Orientation::Forward => f.write_str("F"),
            Orientation::Reverse => f.write_str("R"),
        }
    }
}

/// One end of a template: reference, unclipped position, strand.
///
/// Ordering is by (ref_id, pos, orientation). The ref_id is widened past
/// i32 so the unmapped sentinel can sort after every legal reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EndKey {
    pub ref_id: i64,
    pub pos: i64,
    pub orientation: Orientation,
}

/// Sentinel for an unmapped mate. ref_id exceeds any legal i32 reference
/// id, so it always sorts last.
pub const UNMAPPED: EndKey = EndKey {
    ref_id: 1 << 31,
    pos: -1,
    orientation: Orientation::None,
};

impl fmt::Display for EndKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}{}", self.ref_id, self.pos, self.orientation)
    }
}

fn leading_soft_clip(rec: &Record) -> i64 {
    match rec.cigar().first() {
        Some(&(op, len)) if op == CIGAR_SOFT_CLIP => len as i64,
        _ => 0,
    }
}

fn trailing_soft_clip(rec: &Record) -> i64 {
    match rec.cigar().last() {
        Some(&(op, len)) if op == CIGAR_SOFT_CLIP => len as i64,
        _ => 0,
    }
}

/// Fragment ends of a qname group, coordinate sorted.
///
/// Picks at most one primary alignment per read of the pair (secondary
/// and supplementary records never contribute), then keys each primary:
///
/// - forward strand: unclipped start, i.e. start minus leading soft clip
/// - reverse strand: unclipped end, i.e. end plus trailing soft clip
/// - unmapped: the [`UNMAPPED`] sentinel
///
/// Returns None when the group has no mapped primary, in which case the
/// group cannot be fingerprinted and passes through unmarked.
pub fn template_ends(group: &[Record]) -> Option<[EndKey; 2]> {
    let mut primary: [Option<&Record>; 2] = [None, None];
    for rec in group {
        if rec.is_secondary() || rec.is_supplementary() {
            continue;
        }
        if rec.is_read1() {
            primary[0] = Some(rec);
        } else if rec.is_read2() {
            primary[1] = Some(rec);
        }
    }

    if primary
        .iter()
        .all(|r| r.map_or(true, |rec| rec.is_unmapped()))
    {
        return None;
    }

    let mut ends = [UNMAPPED, UNMAPPED];
    for (end, rec) in ends.iter_mut().zip(primary) {
        let rec = match rec {
            Some(rec) if rec.is_mapped() => rec,
            _ => continue,
        };
        *end = if rec.is_forward() {
            EndKey {
                ref_id: rec.reference_id() as i64,
                pos: rec.reference_start() - leading_soft_clip(rec),
                orientation: Orientation::Forward,
            }
        } else {
            EndKey {
                ref_id: rec.reference_id() as i64,
                pos: rec.reference_end() + trailing_soft_clip(rec),
                orientation: Orientation::Reverse,
            }
        };
    }

    ends.sort_unstable();
    Some(ends)
}
