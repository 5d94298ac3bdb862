//! Integer mixing and the adaptive-hash scramble.
//!
//! The table normally trusts the injected `BuildHasher`. When the observed
//! chain structure says the user's hash is close to identity on the key
//! distribution (see the salt logic in `raw.rs`), every hash is additionally
//! run through [`mix64`], a full-avalanche finalizer, folded with a per-table
//! salt. [`MixHasher`] exposes the same mixing as a standalone hasher for
//! integer keys, where the default SipHash-based `RandomState` leaves speed
//! on the table.

use std::hash::{BuildHasherDefault, Hasher};

/// 2^64 / phi, the multiplier behind Fibonacci hashing.
pub(crate) const FIB_MULTIPLIER: u64 = 0x9E37_79B9_7F4A_7C15;

/// Full-avalanche 64-bit finalizer (the splitmix64 output stage). Every input
/// bit affects roughly half the output bits.
#[inline]
pub(crate) fn mix64(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Cheaper Fibonacci mix: multiply and fold the high half back in. Weaker
/// than [`mix64`] but a single multiply, good enough as a hasher for keys
/// that are already integers.
#[inline]
pub(crate) fn fib_mix(x: u64) -> u64 {
    let wide = u128::from(x) * u128::from(FIB_MULTIPLIER);
    (wide >> 64) as u64 ^ wide as u64
}

/// Compose a user hash with the table salt once adaptive hashing engaged.
#[inline]
pub(crate) fn salted(hash: u64, salt: u64) -> u64 {
    if salt == 0 { hash } else { mix64(hash ^ salt) }
}

/// A fast [`Hasher`] for integer-like keys, mixing written words with the
/// Fibonacci multiplier and finishing through [`mix64`].
///
/// Use via [`IntBuildHasher`]:
///
/// ```
/// use chained_map::{ChainedHashMap, IntBuildHasher};
///
/// let mut map: ChainedHashMap<u64, &str, IntBuildHasher> =
///     ChainedHashMap::with_hasher(IntBuildHasher::default());
/// map.insert(7, "seven");
/// assert_eq!(map.get(&7), Some(&"seven"));
/// ```
#[derive(Debug, Default, Clone)]
pub struct MixHasher {
    state: u64,
}

/// `BuildHasher` for [`MixHasher`].
pub type IntBuildHasher = BuildHasherDefault<MixHasher>;

impl Hasher for MixHasher {
    fn finish(&self) -> u64 {
        mix64(self.state)
    }

    fn write(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            self.state = fib_mix(self.state ^ u64::from_le_bytes(word));
        }
    }

    fn write_u8(&mut self, n: u8) {
        self.write_u64(u64::from(n));
    }

    fn write_u16(&mut self, n: u16) {
        self.write_u64(u64::from(n));
    }

    fn write_u32(&mut self, n: u32) {
        self.write_u64(u64::from(n));
    }

    fn write_u64(&mut self, n: u64) {
        self.state = fib_mix(self.state ^ n);
    }

    fn write_u128(&mut self, n: u128) {
        self.write_u64(n as u64);
        self.write_u64((n >> 64) as u64);
    }

    fn write_usize(&mut self, n: usize) {
        self.write_u64(n as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::BuildHasher;

    #[test]
    fn test_mix64_changes_low_bits() {
        // Sequential inputs must not stay sequential after mixing.
        let a = mix64(1);
        let b = mix64(2);
        assert_ne!(a & 0xFFFF, b & 0xFFFF);
    }

    #[test]
    fn test_mix64_deterministic() {
        assert_eq!(mix64(0xDEAD_BEEF), mix64(0xDEAD_BEEF));
    }

    #[test]
    fn test_salt_zero_is_identity() {
        assert_eq!(salted(12345, 0), 12345);
        assert_ne!(salted(12345, 1), 12345);
    }

    #[test]
    fn test_different_salts_disagree() {
        assert_ne!(salted(99, 1), salted(99, 2));
    }

    #[test]
    fn test_mix_hasher_spreads_integers() {
        let build = IntBuildHasher::default();
        assert_ne!(build.hash_one(1u64), build.hash_one(2u64));

        // Sequential keys must scatter across the low six bits, the part a
        // power-of-two table actually indexes with.
        let mut seen = [false; 64];
        for key in 0u64..64 {
            seen[(build.hash_one(key) & 63) as usize] = true;
        }
        let distinct = seen.iter().filter(|&&hit| hit).count();
        assert!(distinct >= 16, "only {distinct} distinct low-bit patterns");
    }

    #[test]
    fn test_mix_hasher_handles_byte_streams() {
        let build = IntBuildHasher::default();
        assert_ne!(build.hash_one("left"), build.hash_one("right"));
        assert_eq!(build.hash_one("same"), build.hash_one("same"));
    }
}
