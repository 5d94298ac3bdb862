//! The node map: entries boxed individually, so references to keys and
//! values stay valid across rehash.
//!
//! Same table skeleton as [`ChainedHashMap`](crate::ChainedHashMap) — the
//! slot array only holds the chain links and a pointer per entry, and a
//! rehash moves pointers, never the `(key, value)` pairs themselves. On top
//! of that the map can detach an entry as a [`NodeHandle`] and splice a
//! handle back in without touching the heap.

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::mem;

use crate::policy::TableOptions;
use crate::raw::{Cursor, Probe, RawMap, Storage, StoredEntry};
use crate::stats::TableStats;

/// A hash map storing each entry in its own heap node.
///
/// Lookups cost one more pointer chase than
/// [`ChainedHashMap`](crate::ChainedHashMap); in exchange, growing the table
/// never moves an entry in memory:
///
/// ```
/// use chained_map::NodeHashMap;
///
/// let mut map = NodeHashMap::new();
/// map.insert("stable", 1u32);
/// let before: *const u32 = map.get("stable").unwrap();
///
/// map.reserve(100_000); // forces a rehash
/// let after: *const u32 = map.get("stable").unwrap();
/// assert_eq!(before, after);
/// ```
pub struct NodeHashMap<K, V, S = RandomState> {
    raw: RawMap<Box<(K, V)>, S>,
}

/// An entry detached from a [`NodeHashMap`], still owning its heap node.
///
/// Obtained from [`NodeHashMap::extract`]; may be reinserted into the same
/// or another map with [`NodeHashMap::insert_node`] without reallocating.
pub struct NodeHandle<K, V> {
    node: Box<(K, V)>,
}

impl<K, V> NodeHandle<K, V> {
    /// Creates a handle from a key-value pair, allocating its node.
    pub fn new(key: K, value: V) -> Self {
        NodeHandle {
            node: Box::new((key, value)),
        }
    }

    pub fn key(&self) -> &K {
        &self.node.0
    }

    pub fn value(&self) -> &V {
        &self.node.1
    }

    pub fn value_mut(&mut self) -> &mut V {
        &mut self.node.1
    }

    /// Consumes the handle, freeing the node.
    pub fn into_pair(self) -> (K, V) {
        *self.node
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for NodeHandle<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("key", self.key())
            .field("value", self.value())
            .finish()
    }
}

impl<K, V> NodeHashMap<K, V, RandomState> {
    /// Creates an empty map with the minimum bucket count.
    pub fn new() -> Self {
        Self::with_options(TableOptions::default())
    }

    /// Creates an empty map sized to hold at least `capacity` entries before
    /// the first rehash.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_options(TableOptions::default().initial_capacity(capacity))
    }

    /// Creates an empty map configured by `options`.
    pub fn with_options(options: TableOptions) -> Self {
        Self::with_options_and_hasher(options, RandomState::new())
    }
}

impl<K, V, S> NodeHashMap<K, V, S> {
    /// Creates an empty map that hashes with `hasher`.
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_options_and_hasher(TableOptions::default(), hasher)
    }

    /// Creates an empty map configured by `options`, hashing with `hasher`.
    pub fn with_options_and_hasher(options: TableOptions, hasher: S) -> Self {
        NodeHashMap {
            raw: RawMap::with_options(&options, hasher),
        }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.raw.bucket_count()
    }

    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    pub fn load_factor(&self) -> f32 {
        self.raw.load_factor()
    }

    pub fn max_load_factor(&self) -> f32 {
        self.raw.max_load_factor()
    }

    pub fn set_max_load_factor(&mut self, cap: f32) {
        self.raw.set_max_load_factor(cap);
    }

    pub fn hasher(&self) -> &S {
        self.raw.hasher()
    }

    /// Removes all entries, keeping the slot array.
    pub fn clear(&mut self) {
        self.raw.clear();
    }

    /// Borrowing iterator over `(&K, &V)` in slot order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            storage: &self.raw.storage,
            cursor: self.raw.begin(),
        }
    }

    /// Iterator over `(&K, &mut V)`.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&'_ K, &'_ mut V)> {
        self.raw.storage.raw_iter_mut().map(|node| node.pair_mut())
    }

    pub fn keys(&self) -> impl Iterator<Item = &'_ K> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &'_ V> {
        self.iter().map(|(_, v)| v)
    }

    /// Iterator over mutable references to the values.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &'_ mut V> {
        self.iter_mut().map(|(_, v)| v)
    }
}

impl<K, V, S> NodeHashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_key_value(key).map(|(_, v)| v)
    }

    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.find_slot(key)?;
        Some(unsafe { self.raw.storage.entry(slot) }.pair())
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.find_slot(key)?;
        Some(unsafe { self.raw.storage.entry_mut(slot) }.value_mut())
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_slot(key).is_some()
    }

    fn find_slot<Q>(&self, key: &Q) -> Option<u32>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.raw.hash_of(key);
        self.raw.find_index(hash, |stored| (*stored).borrow() == key)
    }

    /// Inserts a key-value pair, replacing and returning the previous value
    /// stored for an equal key. A replacement reuses the existing node.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.raw.expand_if_needed();
        let hash = self.raw.hash_of(&key);
        match self.raw.find_or_allocate(hash, |stored| *stored == key) {
            Probe::Present(slot) => {
                let entry = unsafe { self.raw.storage.entry_mut(slot) };
                Some(mem::replace(entry.value_mut(), value))
            }
            Probe::Vacant { slot, link } => {
                self.raw.storage.install(slot, Box::new((key, value)), link);
                None
            }
        }
    }

    /// Removes `key`, dropping its node and returning the value.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.raw.hash_of(key);
        self.raw
            .remove(hash, |stored| (*stored).borrow() == key)
            .map(|node| node.into_pair().1)
    }

    /// Detaches `key`'s entry without freeing its node.
    pub fn extract<Q>(&mut self, key: &Q) -> Option<NodeHandle<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.find_slot(key)?;
        let (node, _) = self.raw.erase_slot(slot);
        Some(NodeHandle { node })
    }

    /// Splices a detached node into the map. If the key is already present,
    /// the map is unchanged and the handle is given back.
    pub fn insert_node(&mut self, handle: NodeHandle<K, V>) -> Result<(), NodeHandle<K, V>> {
        self.raw.expand_if_needed();
        let hash = self.raw.hash_of(handle.key());
        match self.raw.find_or_allocate(hash, |stored| stored == handle.key()) {
            Probe::Present(_) => Err(handle),
            Probe::Vacant { slot, link } => {
                self.raw.storage.install(slot, handle.node, link);
                Ok(())
            }
        }
    }

    /// Keeps only the entries for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &mut V) -> bool) {
        self.raw.retain(|node| {
            let (k, v) = node.pair_mut();
            keep(k, v)
        });
    }

    /// Pre-size for `additional` more entries. Nodes never move.
    pub fn reserve(&mut self, additional: usize) {
        self.raw.reserve(additional);
    }

    /// Rebuilds the slot array with at least `buckets` slots.
    pub fn rehash(&mut self, buckets: usize) {
        self.raw.rehash(buckets);
    }

    /// Shrinks the slot array to fit the current entries.
    pub fn shrink_to_fit(&mut self) {
        self.raw.rehash(0);
    }

    /// Occupancy and chain statistics; see [`TableStats`].
    pub fn stats(&self) -> TableStats {
        TableStats::collect(&self.raw)
    }
}

impl<K, V, S> crate::HashTable<K, V> for NodeHashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn insert(&mut self, key: K, value: V) -> Option<V> {
        NodeHashMap::insert(self, key, value)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        NodeHashMap::remove(self, key)
    }

    fn get(&self, key: &K) -> Option<&V> {
        NodeHashMap::get(self, key)
    }

    fn len(&self) -> usize {
        NodeHashMap::len(self)
    }
}

impl<K, V, S: Default> Default for NodeHashMap<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> Clone for NodeHashMap<K, V, S>
where
    K: Clone,
    V: Clone,
    S: Clone,
{
    fn clone(&self) -> Self {
        NodeHashMap {
            raw: self.raw.clone(),
        }
    }
}

impl<K, V, S> fmt::Debug for NodeHashMap<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> PartialEq for NodeHashMap<K, V, S>
where
    K: Eq + Hash,
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|ov| ov == v))
    }
}

impl<K, V, S> Extend<(K, V)> for NodeHashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for NodeHashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = Self::with_hasher(S::default());
        map.extend(iter);
        map
    }
}

/// Borrowing iterator over a [`NodeHashMap`].
pub struct Iter<'a, K, V> {
    storage: &'a Storage<Box<(K, V)>>,
    cursor: Cursor,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor.next(self.storage.bitmap())?;
        Some(unsafe { self.storage.entry(slot) }.pair())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.cursor.remaining() as usize;
        (remaining, Some(remaining))
    }
}

impl<'a, K, V, S> IntoIterator for &'a NodeHashMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Owning iterator over a [`NodeHashMap`], freeing each node as it yields.
pub struct IntoIter<K, V, S> {
    raw: RawMap<Box<(K, V)>, S>,
    cursor: Cursor,
}

impl<K, V, S> Iterator for IntoIter<K, V, S> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor.next(self.raw.storage.bitmap())?;
        let node = unsafe { self.raw.storage.take_neutral(slot) };
        Some(node.into_pair())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.cursor.remaining() as usize;
        (remaining, Some(remaining))
    }
}

impl<K, V, S> IntoIterator for NodeHashMap<K, V, S> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V, S>;

    fn into_iter(self) -> Self::IntoIter {
        let cursor = self.raw.begin();
        IntoIter {
            raw: self.raw,
            cursor,
        }
    }
}
