/*!
Chained Hash Map
================

This crate provides two hash maps built on the same open-addressing core:

  - [`ChainedHashMap`]: entries stored inline in the slot array — the fast
    default.
  - [`NodeHashMap`]: entries boxed individually, trading one pointer chase
    for references that survive rehash and for the [`NodeHandle`]
    extract/reinsert protocol.

Collisions are resolved by an intrusive singly-linked chain per hash bucket,
embedded in the slot array itself ("main-position" chaining): every key's
chain starts at `hash & mask`, and an entry occupying another key's home
position is evicted when that key arrives, so a miss usually costs a single
probe. A word-packed bitmap of empty slots drives iteration and free-slot
discovery without touching the entries.

Capacity is always a power of two. Hashing is injected as a
[`BuildHasher`](std::hash::BuildHasher) (`RandomState` by default, or
[`IntBuildHasher`] for integer keys), and a table noticing a degenerate
hash at runtime quietly composes it with a mixing stage — see
[`TableOptions::adaptive_hashing`].

The [`HashTable`] trait gives both flavors a common face; [`TableStats`]
reports the chain census behind a table's probe costs.
*/

mod bitmap;
mod error;
mod hashing;
mod link;
pub mod map;
pub mod node;
mod policy;
mod raw;
mod stats;
mod traits;

pub use error::MapError;
pub use hashing::{IntBuildHasher, MixHasher};
pub use map::{ChainedHashMap, Entry, OccupiedEntry, VacantEntry};
pub use node::{NodeHandle, NodeHashMap};
pub use policy::TableOptions;
pub use stats::TableStats;
pub use traits::HashTable;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_usage_example() {
        let mut table = ChainedHashMap::new();
        table.insert("PI", 314);
        assert_eq!(table.get(&"PI"), Some(&314));
    }
}
