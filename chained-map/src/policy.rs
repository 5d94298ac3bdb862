//! Capacity and load-factor policy.
//!
//! Bucket counts are always powers of two so the hash can be masked instead
//! of divided, with a floor of one bitmap word (64 slots) and a ceiling of
//! 2^30. The load-factor cap is stored as the fixed-point reciprocal
//! `mlf = 2^27 / cap`, which turns every threshold test into integer
//! multiply-and-shift arithmetic.

use crate::error::MapError;

/// Smallest bucket count: one full bitmap word, so the word-at-a-time scans
/// never see a partial word.
pub(crate) const MIN_BUCKETS: u32 = 64;

/// Largest supported bucket count.
pub(crate) const MAX_BUCKETS: u32 = 1 << 30;

/// Fixed-point shift for the stored load-factor reciprocal.
pub(crate) const LF_SHIFT: u32 = 27;

/// Default load-factor cap.
pub(crate) const DEFAULT_MAX_LOAD_FACTOR: f32 = 0.88;

/// Occupied-slot count above which the adaptive-hash check starts looking at
/// the chain structure; smaller tables are noise.
pub(crate) const ADAPTIVE_MIN_FILLED: u32 = 100;

/// Convert a load-factor cap into its fixed-point reciprocal, clamping the
/// cap into `[0.2, 0.99]`.
pub(crate) fn mlf_for(load_factor: f32) -> u32 {
    let clamped = load_factor.clamp(0.2, 0.99);
    ((1u64 << LF_SHIFT) as f32 / clamped) as u32
}

/// The load-factor cap a stored reciprocal represents.
pub(crate) fn max_load_factor(mlf: u32) -> f32 {
    (1u64 << LF_SHIFT) as f32 / mlf as f32
}

/// How many entries a table of `buckets` slots may hold under `mlf`, i.e.
/// `floor(buckets * cap)`.
pub(crate) fn capacity_for(buckets: u32, mlf: u32) -> u64 {
    (u64::from(buckets) << LF_SHIFT) / u64::from(mlf)
}

/// Round a requested bucket count up to a legal one.
pub(crate) fn round_buckets(requested: u32) -> Result<u32, MapError> {
    if requested > MAX_BUCKETS {
        return Err(MapError::CapacityOverflow(u64::from(requested)));
    }
    Ok(requested.next_power_of_two().max(MIN_BUCKETS))
}

/// Smallest legal bucket count able to hold `entries` under `mlf`.
pub(crate) fn buckets_for(entries: u64, mlf: u32) -> Result<u32, MapError> {
    let rough = (entries * u64::from(mlf)) >> LF_SHIFT;
    if rough >= u64::from(MAX_BUCKETS) {
        return Err(MapError::CapacityOverflow(rough));
    }
    let mut buckets = round_buckets(rough as u32)?;
    // The reciprocal rounds, so step up if the floor'd capacity still falls
    // short.
    while capacity_for(buckets, mlf) < entries {
        if buckets == MAX_BUCKETS {
            return Err(MapError::CapacityOverflow(u64::from(buckets) * 2));
        }
        buckets *= 2;
    }
    Ok(buckets)
}

/// Construction-time knobs for a table.
///
/// Defaults match [`TableOptions::default`]; each setter consumes and returns
/// the options so they chain:
///
/// ```
/// use chained_map::{ChainedHashMap, TableOptions};
///
/// let options = TableOptions::default()
///     .initial_capacity(10_000)
///     .max_load_factor(0.75)
///     .adaptive_hashing(false);
/// let map: ChainedHashMap<u64, u64> = ChainedHashMap::with_options(options);
/// assert!(map.capacity() >= 10_000);
/// ```
#[derive(Debug, Clone)]
pub struct TableOptions {
    /// Entries the table should hold before its first rehash. Default: 0
    /// (the 64-bucket minimum).
    pub initial_capacity: usize,

    /// Load-factor cap, clamped to `[0.2, 0.99]`. Default: 0.88.
    pub max_load_factor: f32,

    /// Whether to watch the chain structure and engage the secondary hash
    /// mixer when the injected hash turns out degenerate. Default: true.
    pub adaptive_hashing: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            initial_capacity: 0,
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
            adaptive_hashing: true,
        }
    }
}

impl TableOptions {
    /// Set the number of entries to pre-size for.
    pub fn initial_capacity(mut self, value: usize) -> Self {
        self.initial_capacity = value;
        self
    }

    /// Set the load-factor cap.
    pub fn max_load_factor(mut self, value: f32) -> Self {
        self.max_load_factor = value;
        self
    }

    /// Enable or disable adaptive hashing.
    pub fn adaptive_hashing(mut self, value: bool) -> Self {
        self.adaptive_hashing = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mlf_roundtrip() {
        for cap in [0.2f32, 0.5, 0.75, 0.88, 0.99] {
            let recovered = max_load_factor(mlf_for(cap));
            assert!((recovered - cap).abs() < 1e-3, "{cap} -> {recovered}");
        }
    }

    #[test]
    fn test_mlf_clamps_extremes() {
        assert_eq!(mlf_for(0.05), mlf_for(0.2));
        assert_eq!(mlf_for(1.5), mlf_for(0.99));
    }

    #[test]
    fn test_capacity_for_default_cap() {
        let mlf = mlf_for(DEFAULT_MAX_LOAD_FACTOR);
        let capacity = capacity_for(1024, mlf);
        // floor(1024 * 0.88) = 901, give or take fixed-point rounding.
        assert!((899..=901).contains(&capacity), "capacity {capacity}");
    }

    #[test]
    fn test_round_buckets_floor_and_pow2() {
        assert_eq!(round_buckets(0).unwrap(), MIN_BUCKETS);
        assert_eq!(round_buckets(63).unwrap(), MIN_BUCKETS);
        assert_eq!(round_buckets(65).unwrap(), 128);
        assert_eq!(round_buckets(4096).unwrap(), 4096);
    }

    #[test]
    fn test_buckets_for_holds_requested_entries() {
        let mlf = mlf_for(DEFAULT_MAX_LOAD_FACTOR);
        for entries in [0u64, 1, 56, 57, 1000, 100_000] {
            let buckets = buckets_for(entries, mlf).unwrap();
            assert!(buckets.is_power_of_two());
            assert!(buckets >= MIN_BUCKETS);
            assert!(
                capacity_for(buckets, mlf) >= entries,
                "{entries} entries do not fit in {buckets} buckets"
            );
        }
    }

    #[test]
    fn test_buckets_for_overflow() {
        let mlf = mlf_for(0.5);
        assert!(matches!(
            buckets_for(u64::from(MAX_BUCKETS), mlf),
            Err(MapError::CapacityOverflow(_))
        ));
    }

    #[test]
    fn test_options_builder_chains() {
        let options = TableOptions::default()
            .initial_capacity(500)
            .max_load_factor(0.5)
            .adaptive_hashing(false);
        assert_eq!(options.initial_capacity, 500);
        assert_eq!(options.max_load_factor, 0.5);
        assert!(!options.adaptive_hashing);
    }
}
