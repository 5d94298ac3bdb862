//! Occupancy and chain-structure reporting.
//!
//! A chain census is the cheapest way to judge how well the injected hash
//! fits the key distribution: lots of single-entry chains means most lookups
//! cost one probe, while few long chains means the hash is collapsing keys
//! onto shared home positions.

use std::fmt;

use crate::raw::RawMap;

/// Chain lengths at or above this land in the last histogram bucket.
const HISTOGRAM_CAP: usize = 16;

/// A snapshot of table occupancy and chain structure, from
/// [`ChainedHashMap::stats`](crate::ChainedHashMap::stats) or
/// [`NodeHashMap::stats`](crate::NodeHashMap::stats).
#[derive(Debug, Clone, PartialEq)]
pub struct TableStats {
    /// Stored entries.
    pub len: usize,
    /// Slots in the table.
    pub bucket_count: usize,
    /// `len / bucket_count`.
    pub load_factor: f32,
    /// Number of collision chains (equivalently, of home-position entries).
    pub chains: usize,
    /// Entries living outside their home position.
    pub displaced: usize,
    /// Length of the longest chain.
    pub max_chain_len: usize,
    /// `chain_histogram[n]` counts chains of length `n`; index 0 is unused
    /// and the last index counts every chain of length `>= 15`.
    pub chain_histogram: Vec<usize>,
    /// Average probes for a successful lookup, assuming uniform access:
    /// each chain of length `n` contributes `n * (n + 1) / 2` probes.
    pub expected_probes: f64,
}

impl TableStats {
    pub(crate) fn collect<E, S>(raw: &RawMap<E, S>) -> TableStats {
        let storage = &raw.storage;
        let buckets = storage.buckets();

        let mut histogram = vec![0usize; HISTOGRAM_CAP];
        let mut max_chain_len = 0usize;
        let mut probe_sum = 0u64;

        for slot in 0..buckets {
            if !storage.link(slot).is_home() {
                continue;
            }
            // Chain root: walk to the tail.
            let mut len = 1usize;
            let mut current = slot;
            loop {
                let next = storage.link(current).next();
                if next == current {
                    break;
                }
                current = next;
                len += 1;
            }
            histogram[len.min(HISTOGRAM_CAP - 1)] += 1;
            max_chain_len = max_chain_len.max(len);
            probe_sum += (len * (len + 1) / 2) as u64;
        }

        let len = storage.filled() as usize;
        TableStats {
            len,
            bucket_count: buckets as usize,
            load_factor: raw.load_factor(),
            chains: storage.home_count() as usize,
            displaced: len - storage.home_count() as usize,
            max_chain_len,
            chain_histogram: histogram,
            expected_probes: if len == 0 {
                0.0
            } else {
                probe_sum as f64 / len as f64
            },
        }
    }
}

impl fmt::Display for TableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "entries: {} / {} buckets (load {:.3})",
            self.len, self.bucket_count, self.load_factor
        )?;
        writeln!(
            f,
            "chains: {} ({} displaced entries, longest chain {})",
            self.chains, self.displaced, self.max_chain_len
        )?;
        writeln!(f, "expected probes per hit: {:.3}", self.expected_probes)?;
        writeln!(f, "  len    chains   entries")?;
        for (len, &count) in self.chain_histogram.iter().enumerate().skip(1) {
            if count == 0 {
                continue;
            }
            let marker = if len == HISTOGRAM_CAP - 1 { "+" } else { " " };
            writeln!(f, "  {len:>2}{marker}  {count:>8}  {:>8}", count * len)?;
        }
        Ok(())
    }
}
