//! The inline map: entries stored directly in the slot array.

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::mem;
use std::ops::Index;

use crate::error::MapError;
use crate::policy::TableOptions;
use crate::raw::{Cursor, Probe, RawIterMut, RawMap, Storage, StoredEntry};
use crate::stats::TableStats;

/// A hash map with open addressing, per-bucket intrusive chains, and
/// power-of-two capacity.
///
/// Every key's chain starts at its home position (`hash & mask`); colliding
/// keys are linked through the slot array itself, and an entry squatting in
/// another key's home position is evicted when that key arrives. A bitmap of
/// empty slots drives iteration and free-slot discovery a word at a time.
///
/// Keys must implement [`Eq`] and [`Hash`], with the usual contract that
/// equal keys hash equally and that a key's hash never changes while it is
/// stored. The hasher is injected as a [`BuildHasher`]
/// ([`RandomState`] by default); for integer keys consider
/// [`IntBuildHasher`](crate::IntBuildHasher).
///
/// Iteration order is slot order — a function of insertion history and
/// rehashes, not of keys. Any mutation may move entries between slots;
/// references and iterators never survive one (the borrow checker enforces
/// this).
///
/// # Example
/// ```
/// use chained_map::ChainedHashMap;
///
/// let mut population = ChainedHashMap::new();
/// population.insert("Vienna", 2_014_614);
/// population.insert("Graz", 303_553);
///
/// assert_eq!(population.get("Graz"), Some(&303_553));
/// assert_eq!(population.len(), 2);
///
/// population.remove("Graz");
/// assert!(!population.contains_key("Graz"));
/// ```
pub struct ChainedHashMap<K, V, S = RandomState> {
    pub(crate) raw: RawMap<(K, V), S>,
}

impl<K, V> ChainedHashMap<K, V, RandomState> {
    /// Creates an empty map with the minimum bucket count.
    pub fn new() -> Self {
        Self::with_options(TableOptions::default())
    }

    /// Creates an empty map sized to hold at least `capacity` entries before
    /// the first rehash. The bucket count is rounded up to a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_options(TableOptions::default().initial_capacity(capacity))
    }

    /// Creates an empty map configured by `options`.
    pub fn with_options(options: TableOptions) -> Self {
        Self::with_options_and_hasher(options, RandomState::new())
    }
}

impl<K, V, S> ChainedHashMap<K, V, S> {
    /// Creates an empty map that hashes with `hasher`.
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_options_and_hasher(TableOptions::default(), hasher)
    }

    /// Creates an empty map sized for `capacity` entries, hashing with
    /// `hasher`.
    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self::with_options_and_hasher(TableOptions::default().initial_capacity(capacity), hasher)
    }

    /// Creates an empty map configured by `options`, hashing with `hasher`.
    pub fn with_options_and_hasher(options: TableOptions, hasher: S) -> Self {
        ChainedHashMap {
            raw: RawMap::with_options(&options, hasher),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots in the table. Always a power of two, at least 64.
    pub fn bucket_count(&self) -> usize {
        self.raw.bucket_count()
    }

    /// Entries the map can hold before the next growth.
    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    /// Current occupancy, `len / bucket_count`.
    pub fn load_factor(&self) -> f32 {
        self.raw.load_factor()
    }

    /// The occupancy cap that triggers growth.
    pub fn max_load_factor(&self) -> f32 {
        self.raw.max_load_factor()
    }

    /// Set the occupancy cap, clamped to `[0.2, 0.99]`. Takes effect at the
    /// next insert or reserve.
    pub fn set_max_load_factor(&mut self, cap: f32) {
        self.raw.set_max_load_factor(cap);
    }

    /// Upper bound on the bucket count (and therefore on entries).
    pub fn max_size() -> usize {
        crate::policy::MAX_BUCKETS as usize
    }

    /// The injected hasher.
    pub fn hasher(&self) -> &S {
        self.raw.hasher()
    }

    /// Removes all entries, keeping the allocation.
    pub fn clear(&mut self) {
        self.raw.clear();
    }

    /// Exchanges the contents of two maps.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Borrowing iterator over `(&K, &V)` in slot order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            storage: &self.raw.storage,
            cursor: self.raw.begin(),
        }
    }

    /// Iterator over `(&K, &mut V)`.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            inner: self.raw.storage.raw_iter_mut(),
        }
    }

    /// Iterator over the keys.
    pub fn keys(&self) -> impl Iterator<Item = &'_ K> {
        self.iter().map(|(k, _)| k)
    }

    /// Iterator over the values.
    pub fn values(&self) -> impl Iterator<Item = &'_ V> {
        self.iter().map(|(_, v)| v)
    }

    /// Iterator over mutable references to the values.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &'_ mut V> {
        self.iter_mut().map(|(_, v)| v)
    }
}

impl<K, V, S> ChainedHashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Returns a reference to the value stored for `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_key_value(key).map(|(_, v)| v)
    }

    /// Returns the stored key-value pair matching `key`.
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.find_slot(key)?;
        Some(unsafe { self.raw.storage.entry(slot) }.pair())
    }

    /// Returns a mutable reference to the value stored for `key`.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.find_slot(key)?;
        Some(unsafe { self.raw.storage.entry_mut(slot) }.value_mut())
    }

    /// `true` if the map stores `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_slot(key).is_some()
    }

    /// Checked access: a reference to the value for `key`, or
    /// [`MapError::KeyNotFound`].
    pub fn at<Q>(&self, key: &Q) -> Result<&V, MapError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).ok_or(MapError::KeyNotFound)
    }

    /// Checked mutable access; see [`ChainedHashMap::at`].
    pub fn at_mut<Q>(&mut self, key: &Q) -> Result<&mut V, MapError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_mut(key).ok_or(MapError::KeyNotFound)
    }

    /// Iterator over the at most one entry matching `key` — the map
    /// equivalent of a multimap's key range.
    pub fn equal_range<Q>(&self, key: &Q) -> Iter<'_, K, V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let cursor = match self.find_slot(key) {
            Some(slot) => Cursor::at_slot(self.raw.storage.bitmap(), slot, 1),
            None => Cursor::done(),
        };
        Iter {
            storage: &self.raw.storage,
            cursor,
        }
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
    /// stored for an equal key.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.raw.expand_if_needed();
        let hash = self.raw.hash_of(&key);
        match self.raw.find_or_allocate(hash, |stored| *stored == key) {
            Probe::Present(slot) => {
                let entry = unsafe { self.raw.storage.entry_mut(slot) };
                Some(mem::replace(entry.value_mut(), value))
            }
            Probe::Vacant { slot, link } => {
                self.raw.storage.install(slot, (key, value), link);
                None
            }
        }
    }

    /// Inserts a key the caller guarantees is absent, skipping the key
    /// comparisons of [`ChainedHashMap::insert`]. Inserting a present key
    /// this way leaves the map holding two entries for it.
    pub fn insert_unique(&mut self, key: K, value: V) {
        debug_assert!(!self.contains_key(&key), "insert_unique on a present key");
        self.raw.expand_if_needed();
        let hash = self.raw.hash_of(&key);
        let (slot, link) = self.raw.find_unique_slot(hash);
        self.raw.storage.install(slot, (key, value), link);
    }

    /// The entry for `key`, for in-place manipulation.
    ///
    /// ```
    /// use chained_map::ChainedHashMap;
    ///
    /// let mut tally: ChainedHashMap<&str, u32> = ChainedHashMap::new();
    /// for word in ["a", "b", "a"] {
    ///     *tally.entry(word).or_insert(0) += 1;
    /// }
    /// assert_eq!(tally.get("a"), Some(&2));
    /// ```
    pub fn entry(&mut self, key: K) -> Entry<'_, K, V, S> {
        match self.find_slot(&key) {
            Some(slot) => Entry::Occupied(OccupiedEntry {
                map: self,
                slot,
                key,
            }),
            None => Entry::Vacant(VacantEntry { map: self, key }),
        }
    }

    /// Removes `key`, returning its value.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_entry(key).map(|(_, v)| v)
    }

    /// Removes `key`, returning the stored key and value.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.raw.hash_of(key);
        self.raw.remove(hash, |stored| (*stored).borrow() == key)
    }

    /// Keeps only the entries for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &mut V) -> bool) {
        self.raw.retain(|entry| {
            let (k, v) = entry.pair_mut();
            keep(k, v)
        });
    }

    /// Removes and yields every entry. Dropping the iterator drops the
    /// remaining entries; the allocation is kept.
    pub fn drain(&mut self) -> Drain<'_, K, V, S> {
        let cursor = self.raw.begin();
        Drain {
            raw: &mut self.raw,
            cursor,
        }
    }

    /// Moves every entry of `other` whose key is absent here into `self`.
    /// Conflicting entries stay in `other`.
    pub fn merge(&mut self, other: &mut Self) {
        if self.is_empty() {
            mem::swap(self, other);
            return;
        }
        let mut slot = 0;
        while slot < other.raw.storage.buckets() {
            if other.raw.storage.is_occupied(slot) {
                let key = unsafe { other.raw.storage.entry(slot) }.key();
                if !self.contains_key(key) {
                    let (entry, freed) = other.raw.erase_slot(slot);
                    let (k, v) = entry.into_pair();
                    self.insert_unique(k, v);
                    if freed != slot {
                        continue;
                    }
                }
            }
            slot += 1;
        }
    }

    /// Pre-size for `additional` more entries. Panics if that would exceed
    /// the maximum bucket count.
    pub fn reserve(&mut self, additional: usize) {
        self.raw.reserve(additional);
    }

    /// Fallible [`ChainedHashMap::reserve`]: on error the map is unchanged.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), MapError> {
        self.raw.try_reserve(additional)
    }

    /// Rebuilds the table with at least `buckets` slots (rounded up to a
    /// power of two, never fewer than the current entries require).
    pub fn rehash(&mut self, buckets: usize) {
        self.raw.rehash(buckets);
    }

    /// Shrinks the table to the smallest bucket count that holds the current
    /// entries under the load cap.
    pub fn shrink_to_fit(&mut self) {
        self.raw.rehash(0);
    }

    /// Occupancy and chain statistics; see [`TableStats`].
    pub fn stats(&self) -> TableStats {
        TableStats::collect(&self.raw)
    }
}

impl<K, V, S> crate::HashTable<K, V> for ChainedHashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn insert(&mut self, key: K, value: V) -> Option<V> {
        ChainedHashMap::insert(self, key, value)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        ChainedHashMap::remove(self, key)
    }

    fn get(&self, key: &K) -> Option<&V> {
        ChainedHashMap::get(self, key)
    }

    fn len(&self) -> usize {
        ChainedHashMap::len(self)
    }
}

impl<K, V, S: Default> Default for ChainedHashMap<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> Clone for ChainedHashMap<K, V, S>
where
    K: Clone,
    V: Clone,
    S: Clone,
{
    fn clone(&self) -> Self {
        ChainedHashMap {
            raw: self.raw.clone(),
        }
    }
}

impl<K, V, S> fmt::Debug for ChainedHashMap<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> PartialEq for ChainedHashMap<K, V, S>
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

impl<K, V, S> Eq for ChainedHashMap<K, V, S>
where
    K: Eq + Hash,
    V: Eq,
    S: BuildHasher,
{
}

impl<K, V, S, Q> Index<&Q> for ChainedHashMap<K, V, S>
where
    K: Eq + Hash + Borrow<Q>,
    Q: Eq + Hash + ?Sized,
    S: BuildHasher,
{
    type Output = V;

    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("no entry found for key")
    }
}

impl<K, V, S> Extend<(K, V)> for ChainedHashMap<K, V, S>
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

impl<K, V, S> FromIterator<(K, V)> for ChainedHashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let iter = iter.into_iter();
        let mut map = Self::with_capacity_and_hasher(iter.size_hint().0, S::default());
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for ChainedHashMap<K, V, RandomState>
where
    K: Eq + Hash,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// Iterators
// ---------------------------------------------------------------------------

/// Borrowing iterator over a [`ChainedHashMap`].
pub struct Iter<'a, K, V> {
    storage: &'a Storage<(K, V)>,
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

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            storage: self.storage,
            cursor: self.cursor.clone(),
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a ChainedHashMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Mutable iterator over a [`ChainedHashMap`].
pub struct IterMut<'a, K, V> {
    inner: RawIterMut<'a, (K, V)>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.inner.next()?;
        Some(entry.pair_mut())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, K, V, S> IntoIterator for &'a mut ChainedHashMap<K, V, S> {
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// Owning iterator over a [`ChainedHashMap`].
pub struct IntoIter<K, V, S> {
    raw: RawMap<(K, V), S>,
    cursor: Cursor,
}

impl<K, V, S> Iterator for IntoIter<K, V, S> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor.next(self.raw.storage.bitmap())?;
        Some(unsafe { self.raw.storage.take_neutral(slot) })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.cursor.remaining() as usize;
        (remaining, Some(remaining))
    }
}

impl<K, V, S> IntoIterator for ChainedHashMap<K, V, S> {
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

/// Draining iterator returned by [`ChainedHashMap::drain`].
pub struct Drain<'a, K, V, S> {
    raw: &'a mut RawMap<(K, V), S>,
    cursor: Cursor,
}

impl<K, V, S> Iterator for Drain<'_, K, V, S> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor.next(self.raw.storage.bitmap())?;
        Some(unsafe { self.raw.storage.take_neutral(slot) })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.cursor.remaining() as usize;
        (remaining, Some(remaining))
    }
}

impl<K, V, S> Drop for Drain<'_, K, V, S> {
    fn drop(&mut self) {
        while self.next().is_some() {}
        self.raw.storage.reset_index();
    }
}

// ---------------------------------------------------------------------------
// Entry API
// ---------------------------------------------------------------------------

/// A view into a single map slot, occupied or vacant.
pub enum Entry<'a, K, V, S = RandomState> {
    /// The key is present.
    Occupied(OccupiedEntry<'a, K, V, S>),
    /// The key is absent.
    Vacant(VacantEntry<'a, K, V, S>),
}

/// An occupied [`Entry`].
pub struct OccupiedEntry<'a, K, V, S = RandomState> {
    map: &'a mut ChainedHashMap<K, V, S>,
    slot: u32,
    key: K,
}

/// A vacant [`Entry`].
pub struct VacantEntry<'a, K, V, S = RandomState> {
    map: &'a mut ChainedHashMap<K, V, S>,
    key: K,
}

impl<'a, K, V, S> Entry<'a, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// The key this entry was looked up with.
    pub fn key(&self) -> &K {
        match self {
            Entry::Occupied(entry) => &entry.key,
            Entry::Vacant(entry) => &entry.key,
        }
    }

    /// Inserts `default` if vacant; returns a mutable reference to the
    /// value.
    pub fn or_insert(self, default: V) -> &'a mut V {
        self.or_insert_with(|| default)
    }

    /// Inserts `default()` if vacant — the value is not constructed when the
    /// key is present.
    pub fn or_insert_with(self, default: impl FnOnce() -> V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default()),
        }
    }

    /// Inserts `V::default()` if vacant.
    pub fn or_default(self) -> &'a mut V
    where
        V: Default,
    {
        self.or_insert_with(V::default)
    }

    /// Applies `f` to the value if present, then returns the entry.
    pub fn and_modify(mut self, f: impl FnOnce(&mut V)) -> Self {
        if let Entry::Occupied(entry) = &mut self {
            f(entry.get_mut());
        }
        self
    }
}

impl<'a, K, V, S> OccupiedEntry<'a, K, V, S> {
    /// The stored value.
    pub fn get(&self) -> &V {
        unsafe { self.map.raw.storage.entry(self.slot) }.value()
    }

    /// The stored value, mutably.
    pub fn get_mut(&mut self) -> &mut V {
        unsafe { self.map.raw.storage.entry_mut(self.slot) }.value_mut()
    }

    /// The stored value, mutably, outliving the entry view.
    pub fn into_mut(self) -> &'a mut V {
        unsafe { self.map.raw.storage.entry_mut(self.slot) }.value_mut()
    }

    /// Replaces the value, returning the previous one.
    pub fn insert(&mut self, value: V) -> V {
        mem::replace(self.get_mut(), value)
    }
}

impl<'a, K, V, S> OccupiedEntry<'a, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Removes the entry, returning its value.
    pub fn remove(self) -> V {
        self.map.raw.erase_slot(self.slot).0.into_pair().1
    }
}

impl<'a, K, V, S> VacantEntry<'a, K, V, S> {
    /// The key this entry was looked up with.
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<'a, K, V, S> VacantEntry<'a, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Inserts `value`, returning a mutable reference to it.
    pub fn insert(self, value: V) -> &'a mut V {
        let VacantEntry { map, key } = self;
        map.raw.expand_if_needed();
        let hash = map.raw.hash_of(&key);
        let slot = match map.raw.find_or_allocate(hash, |stored| *stored == key) {
            // Unreachable unless Hash/Eq misbehave between the lookup and
            // now; overwrite rather than corrupt the chain.
            Probe::Present(slot) => {
                *unsafe { map.raw.storage.entry_mut(slot) }.value_mut() = value;
                slot
            }
            Probe::Vacant { slot, link } => {
                map.raw.storage.install(slot, (key, value), link);
                slot
            }
        };
        unsafe { map.raw.storage.entry_mut(slot) }.value_mut()
    }
}
