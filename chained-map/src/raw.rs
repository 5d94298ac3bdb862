//! The shared open-addressing core behind both map flavors.
//!
//! ---------------------------------------------------------------------------
//! How the collision scheme works:
//!
//! 1) Every key has a home position, `hash(key) & mask`. All keys sharing a
//!    home form one chain, singly linked through the `Link` field embedded in
//!    the slot array itself — there is no separate node allocation for the
//!    chain (the node flavor boxes entries for address stability, not for
//!    chaining).
//!
//! 2) A chain always starts at its home position. The occupant of a home
//!    position is either the chain's root (link tagged "home") or an entry
//!    displaced there from some other chain (link tagged "displaced"). When
//!    an insert finds its home position held by a displaced entry, that
//!    entry is kicked out to a free slot and the new key claims its home —
//!    the same move Lua's tables make, which keeps lookups for absent keys
//!    at one probe.
//!
//! 3) Free slots are found through the bitmap, one 64-slot word at a time,
//!    instead of walking the slot array.
//! ---------------------------------------------------------------------------

use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};

use log::{debug, info};

use crate::bitmap::{Bitmap, WORD_BITS};
use crate::error::MapError;
use crate::hashing::salted;
use crate::link::{Link, LinkKind};
use crate::policy::{self, TableOptions};

/// Sentinel slots kept past the live table so the word-granular scans can
/// run to the boundary without special cases.
const TAIL_SLOTS: usize = 2;

/// Per-slot payload: `(K, V)` for the inline map, `Box<(K, V)>` for the node
/// map. The core only ever needs the key projection and, at the surface,
/// the pair projections.
pub(crate) trait StoredEntry {
    type Key;
    type Value;

    fn key(&self) -> &Self::Key;
    fn pair(&self) -> (&Self::Key, &Self::Value);
    fn pair_mut(&mut self) -> (&Self::Key, &mut Self::Value);
    fn value(&self) -> &Self::Value;
    fn value_mut(&mut self) -> &mut Self::Value;
    fn into_pair(self) -> (Self::Key, Self::Value);
}

impl<K, V> StoredEntry for (K, V) {
    type Key = K;
    type Value = V;

    fn key(&self) -> &K {
        &self.0
    }

    fn pair(&self) -> (&K, &V) {
        (&self.0, &self.1)
    }

    fn pair_mut(&mut self) -> (&K, &mut V) {
        (&self.0, &mut self.1)
    }

    fn value(&self) -> &V {
        &self.1
    }

    fn value_mut(&mut self) -> &mut V {
        &mut self.1
    }

    fn into_pair(self) -> (K, V) {
        self
    }
}

impl<K, V> StoredEntry for Box<(K, V)> {
    type Key = K;
    type Value = V;

    fn key(&self) -> &K {
        &self.0
    }

    fn pair(&self) -> (&K, &V) {
        (&self.0, &self.1)
    }

    fn pair_mut(&mut self) -> (&K, &mut V) {
        let pair = &mut **self;
        (&pair.0, &mut pair.1)
    }

    fn value(&self) -> &V {
        &self.1
    }

    fn value_mut(&mut self) -> &mut V {
        &mut self.1
    }

    fn into_pair(self) -> (K, V) {
        *self
    }
}

struct Slot<E> {
    link: Link,
    entry: MaybeUninit<E>,
}

impl<E> Slot<E> {
    fn empty() -> Slot<E> {
        Slot {
            link: Link::INACTIVE,
            entry: MaybeUninit::uninit(),
        }
    }
}

/// Slot array, bitmap, and the header fields that describe them. The entry
/// at slot `i` is initialized exactly while `link(i)` is occupied; the
/// bitmap mirrors the same fact bit-for-bit.
pub(crate) struct Storage<E> {
    slots: Box<[Slot<E>]>,
    bitmap: Bitmap,
    mask: u32,
    filled: u32,
    home_count: u32,
    last_scan: u32,
}

impl<E> Storage<E> {
    fn with_buckets(buckets: u32) -> Storage<E> {
        let mut slots = Vec::with_capacity(buckets as usize + TAIL_SLOTS);
        slots.resize_with(buckets as usize + TAIL_SLOTS, Slot::empty);
        Storage {
            slots: slots.into_boxed_slice(),
            bitmap: Bitmap::all_empty(buckets),
            mask: buckets - 1,
            filled: 0,
            home_count: 0,
            last_scan: 0,
        }
    }

    fn try_with_buckets(buckets: u32) -> Result<Storage<E>, MapError> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(buckets as usize + TAIL_SLOTS)?;
        slots.resize_with(buckets as usize + TAIL_SLOTS, Slot::empty);
        Ok(Storage {
            slots: slots.into_boxed_slice(),
            bitmap: Bitmap::try_all_empty(buckets)?,
            mask: buckets - 1,
            filled: 0,
            home_count: 0,
            last_scan: 0,
        })
    }

    pub(crate) fn buckets(&self) -> u32 {
        self.mask + 1
    }

    pub(crate) fn filled(&self) -> u32 {
        self.filled
    }

    pub(crate) fn home_count(&self) -> u32 {
        self.home_count
    }

    pub(crate) fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    pub(crate) fn link(&self, slot: u32) -> Link {
        self.slots[slot as usize].link
    }

    pub(crate) fn is_occupied(&self, slot: u32) -> bool {
        self.slots[slot as usize].link.is_occupied()
    }

    /// # Safety
    /// `slot` must be occupied.
    pub(crate) unsafe fn entry(&self, slot: u32) -> &E {
        debug_assert!(self.is_occupied(slot));
        unsafe { self.slots[slot as usize].entry.assume_init_ref() }
    }

    /// # Safety
    /// `slot` must be occupied.
    pub(crate) unsafe fn entry_mut(&mut self, slot: u32) -> &mut E {
        debug_assert!(self.is_occupied(slot));
        unsafe { self.slots[slot as usize].entry.assume_init_mut() }
    }

    /// Move the entry out without any bookkeeping. The caller must pair this
    /// with [`Storage::vacate`] or [`Storage::overwrite`] before the slot is
    /// observed again.
    ///
    /// # Safety
    /// `slot` must be occupied.
    unsafe fn read_entry(&self, slot: u32) -> E {
        debug_assert!(self.is_occupied(slot));
        unsafe { self.slots[slot as usize].entry.as_ptr().read() }
    }

    /// Re-fill an occupied slot whose entry was moved out.
    ///
    /// # Safety
    /// The slot's previous entry must have been read out.
    unsafe fn overwrite(&mut self, slot: u32, entry: E) {
        self.slots[slot as usize].entry.write(entry);
    }

    /// Put `entry` into an empty slot and account for it.
    pub(crate) fn install(&mut self, slot: u32, entry: E, link: Link) {
        debug_assert!(!self.is_occupied(slot));
        debug_assert!(link.is_occupied());
        let target = &mut self.slots[slot as usize];
        target.entry.write(entry);
        target.link = link;
        self.bitmap.mark_occupied(slot);
        self.filled += 1;
        if link.is_home() {
            self.home_count += 1;
        }
    }

    /// Mark an occupied slot empty. The entry must already have been moved
    /// out or dropped.
    fn vacate(&mut self, slot: u32) {
        let target = &mut self.slots[slot as usize];
        debug_assert!(target.link.is_occupied());
        if target.link.is_home() {
            self.home_count -= 1;
        }
        target.link = Link::INACTIVE;
        self.bitmap.mark_empty(slot);
        self.filled -= 1;
    }

    /// Move the entry out and mark the slot empty.
    ///
    /// # Safety
    /// `slot` must be occupied.
    unsafe fn take(&mut self, slot: u32) -> E {
        let entry = unsafe { self.read_entry(slot) };
        self.vacate(slot);
        entry
    }

    /// Detach a slot's entry logically without touching the bitmap, leaving
    /// the storage to be rebuilt, reset, or dropped. Used while draining.
    ///
    /// # Safety
    /// `slot` must be occupied and its entry must be read out by the caller.
    pub(crate) unsafe fn neutralize(&mut self, slot: u32) {
        debug_assert!(self.is_occupied(slot));
        self.slots[slot as usize].link = Link::INACTIVE;
        self.filled -= 1;
    }

    /// Move the entry out, skipping bitmap maintenance; see
    /// [`Storage::neutralize`].
    ///
    /// # Safety
    /// `slot` must be occupied.
    pub(crate) unsafe fn take_neutral(&mut self, slot: u32) -> E {
        let entry = unsafe { self.read_entry(slot) };
        unsafe { self.neutralize(slot) };
        entry
    }

    /// Rewrite an occupied slot's link.
    fn set_link(&mut self, slot: u32, link: Link) {
        debug_assert!(self.is_occupied(slot));
        debug_assert!(link.is_occupied());
        self.slots[slot as usize].link = link;
    }

    /// Restore the index to the all-empty state after a drain emptied every
    /// slot through [`Storage::neutralize`].
    pub(crate) fn reset_index(&mut self) {
        debug_assert_eq!(self.filled, 0);
        self.bitmap.reset_all_empty();
        self.home_count = 0;
        self.last_scan = 0;
    }

    /// Drop every entry and return to the freshly-built state, keeping the
    /// allocation.
    fn clear(&mut self) {
        if self.filled > 0 {
            for slot in self.slots[..=self.mask as usize].iter_mut() {
                if slot.link.is_occupied() {
                    slot.link = Link::INACTIVE;
                    unsafe { slot.entry.assume_init_drop() };
                }
            }
        }
        self.filled = 0;
        self.home_count = 0;
        self.last_scan = 0;
        self.bitmap.reset_all_empty();
    }

    /// Mutable iteration over the occupied entries. Splits the borrow: the
    /// bitmap stays shared for the cursor while the slot array is handed
    /// over as a raw pointer, so yielded `&mut` entries can outlive the
    /// iterator's own borrows of it.
    pub(crate) fn raw_iter_mut(&mut self) -> RawIterMut<'_, E> {
        let cursor = Cursor::begin(&self.bitmap, self.filled);
        RawIterMut {
            slots: self.slots.as_mut_ptr(),
            bitmap: &self.bitmap,
            cursor,
            _marker: PhantomData,
        }
    }

    /// Nearest empty slot at or after `from`, by bitmap word scan: the word
    /// covering `from`, then a fixed forward probe, then a rolling walk that
    /// alternates between `last_scan` and the word half the table away from
    /// it. The caller guarantees at least one empty slot exists (the load
    /// cap is strictly below 1).
    fn find_empty_slot(&mut self, from: u32) -> u32 {
        let shifted = self.bitmap.word(from / WORD_BITS) >> (from % WORD_BITS);
        if shifted != 0 {
            return from + shifted.trailing_zeros();
        }

        let word_mask = self.mask / WORD_BITS;
        let probe = (from + 2 * WORD_BITS) & word_mask;
        let word = self.bitmap.word(probe);
        if word != 0 {
            return probe * WORD_BITS + word.trailing_zeros();
        }

        loop {
            let word = self.bitmap.word(self.last_scan);
            if word != 0 {
                return self.last_scan * WORD_BITS + word.trailing_zeros();
            }
            let opposite = (self.last_scan + word_mask / 2) & word_mask;
            let word = self.bitmap.word(opposite);
            if word != 0 {
                self.last_scan = opposite;
                return opposite * WORD_BITS + word.trailing_zeros();
            }
            self.last_scan = (self.last_scan + 1) & word_mask;
        }
    }
}

impl<E> Drop for Storage<E> {
    fn drop(&mut self) {
        if !mem::needs_drop::<E>() || self.filled == 0 {
            return;
        }
        let mut remaining = self.filled;
        for slot in self.slots.iter_mut() {
            if remaining == 0 {
                break;
            }
            if slot.link.is_occupied() {
                remaining -= 1;
                unsafe { slot.entry.assume_init_drop() };
            }
        }
    }
}

impl<E: Clone> Clone for Storage<E> {
    fn clone(&self) -> Self {
        let mut slots = Vec::with_capacity(self.slots.len());
        for slot in self.slots.iter() {
            let entry = if slot.link.is_occupied() {
                MaybeUninit::new(unsafe { slot.entry.assume_init_ref() }.clone())
            } else {
                MaybeUninit::uninit()
            };
            slots.push(Slot {
                link: slot.link,
                entry,
            });
        }
        Storage {
            slots: slots.into_boxed_slice(),
            bitmap: self.bitmap.clone(),
            mask: self.mask,
            filled: self.filled,
            home_count: self.home_count,
            last_scan: self.last_scan,
        }
    }
}

/// Outcome of the insert probe.
pub(crate) enum Probe {
    /// The key is already stored at this slot.
    Present(u32),
    /// The key is absent; install it at `slot` with `link`.
    Vacant { slot: u32, link: Link },
}

/// Position of a slot within the bitmap, with one inverted word cached so
/// stepping to the next occupied slot is a trailing-zero count. The zeroed
/// tail word reads as fully occupied, which parks the cursor at the table
/// boundary; `remaining` makes exhaustion explicit regardless.
#[derive(Clone)]
pub(crate) struct Cursor {
    base: u32,
    bits: u64,
    remaining: u32,
}

impl Cursor {
    pub(crate) fn begin(bitmap: &Bitmap, filled: u32) -> Cursor {
        Cursor {
            base: 0,
            bits: !bitmap.word(0),
            remaining: filled,
        }
    }

    /// Cursor whose first yield is `slot` (which must be occupied).
    pub(crate) fn at_slot(bitmap: &Bitmap, slot: u32, remaining: u32) -> Cursor {
        Cursor {
            base: slot & !(WORD_BITS - 1),
            bits: !bitmap.word(slot / WORD_BITS) & (u64::MAX << (slot % WORD_BITS)),
            remaining,
        }
    }

    pub(crate) fn done() -> Cursor {
        Cursor {
            base: 0,
            bits: 0,
            remaining: 0,
        }
    }

    pub(crate) fn remaining(&self) -> u32 {
        self.remaining
    }

    pub(crate) fn next(&mut self, bitmap: &Bitmap) -> Option<u32> {
        if self.remaining == 0 {
            return None;
        }
        loop {
            if self.bits != 0 {
                let slot = self.base + self.bits.trailing_zeros();
                self.bits &= self.bits - 1;
                self.remaining -= 1;
                return Some(slot);
            }
            self.base += WORD_BITS;
            self.bits = !bitmap.word(self.base / WORD_BITS);
        }
    }
}

/// Mutable entry iterator over a [`Storage`], in slot order.
pub(crate) struct RawIterMut<'a, E> {
    slots: *mut Slot<E>,
    bitmap: &'a Bitmap,
    cursor: Cursor,
    _marker: PhantomData<&'a mut E>,
}

unsafe impl<E: Send> Send for RawIterMut<'_, E> {}
unsafe impl<E: Sync> Sync for RawIterMut<'_, E> {}

impl<'a, E> Iterator for RawIterMut<'a, E> {
    type Item = &'a mut E;

    fn next(&mut self) -> Option<&'a mut E> {
        let slot = self.cursor.next(self.bitmap)?;
        // Each occupied slot is yielded exactly once, so the `&mut` handed
        // out here never aliases a previous one.
        let slot_ptr = unsafe { self.slots.add(slot as usize) };
        Some(unsafe { (*slot_ptr).entry.assume_init_mut() })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.cursor.remaining() as usize;
        (remaining, Some(remaining))
    }
}

/// The table core: storage plus hashing and growth policy. `ChainedHashMap`
/// and `NodeHashMap` are thin shells over this.
pub(crate) struct RawMap<E, S> {
    pub(crate) storage: Storage<E>,
    hasher: S,
    mlf: u32,
    salt: u64,
    adaptive: bool,
}

impl<E: Clone, S: Clone> Clone for RawMap<E, S> {
    fn clone(&self) -> Self {
        RawMap {
            storage: self.storage.clone(),
            hasher: self.hasher.clone(),
            mlf: self.mlf,
            salt: self.salt,
            adaptive: self.adaptive,
        }
    }
}

impl<E, S> RawMap<E, S> {
    pub(crate) fn with_options(options: &TableOptions, hasher: S) -> RawMap<E, S> {
        let mlf = policy::mlf_for(options.max_load_factor);
        let buckets = policy::buckets_for(options.initial_capacity as u64, mlf)
            .unwrap_or_else(|err| panic!("{err}"));
        RawMap {
            storage: Storage::with_buckets(buckets),
            hasher,
            mlf,
            salt: 0,
            adaptive: options.adaptive_hashing,
        }
    }

    pub(crate) fn hasher(&self) -> &S {
        &self.hasher
    }

    pub(crate) fn len(&self) -> usize {
        self.storage.filled() as usize
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.storage.buckets() as usize
    }

    pub(crate) fn load_factor(&self) -> f32 {
        self.storage.filled() as f32 / self.storage.buckets() as f32
    }

    pub(crate) fn max_load_factor(&self) -> f32 {
        policy::max_load_factor(self.mlf)
    }

    pub(crate) fn set_max_load_factor(&mut self, cap: f32) {
        self.mlf = policy::mlf_for(cap);
    }

    /// Entries the table can hold before the next growth.
    pub(crate) fn capacity(&self) -> usize {
        policy::capacity_for(self.storage.buckets(), self.mlf) as usize
    }

    pub(crate) fn clear(&mut self) {
        self.storage.clear();
    }

    pub(crate) fn begin(&self) -> Cursor {
        Cursor::begin(self.storage.bitmap(), self.storage.filled())
    }
}

impl<E, S> RawMap<E, S>
where
    E: StoredEntry,
    E::Key: Hash,
    S: BuildHasher,
{
    pub(crate) fn hash_of<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        salted(self.hasher.hash_one(key), self.salt)
    }

    fn home_bucket(&self, hash: u64) -> u32 {
        (hash & u64::from(self.storage.mask)) as u32
    }

    /// Home position of the entry currently stored at `slot`.
    fn home_of_slot(&self, slot: u32) -> u32 {
        let hash = self.hash_of(unsafe { self.storage.entry(slot) }.key());
        self.home_bucket(hash)
    }

    /// Slot holding the entry `is_match` accepts, walking the chain rooted
    /// at the hash's home position.
    pub(crate) fn find_index(
        &self,
        hash: u64,
        mut is_match: impl FnMut(&E::Key) -> bool,
    ) -> Option<u32> {
        let bucket = self.home_bucket(hash);
        let next = match self.storage.link(bucket).decode() {
            LinkKind::Empty => return None,
            // A displaced occupant means this home's own chain is empty.
            LinkKind::Displaced { .. } => return None,
            LinkKind::Home { next } => next,
        };
        if is_match(unsafe { self.storage.entry(bucket) }.key()) {
            return Some(bucket);
        }
        if next == bucket {
            return None;
        }
        let mut slot = next;
        loop {
            if is_match(unsafe { self.storage.entry(slot) }.key()) {
                return Some(slot);
            }
            let following = self.storage.link(slot).next();
            if following == slot {
                return None;
            }
            slot = following;
        }
    }

    /// Find the key's slot, or pick and wire up the slot a new entry should
    /// be installed in. In the vacant case every chain link is already
    /// rewritten; the caller only has to [`Storage::install`] with the
    /// returned link.
    pub(crate) fn find_or_allocate(
        &mut self,
        hash: u64,
        mut is_match: impl FnMut(&E::Key) -> bool,
    ) -> Probe {
        let bucket = self.home_bucket(hash);
        let next = match self.storage.link(bucket).decode() {
            LinkKind::Empty => {
                return Probe::Vacant {
                    slot: bucket,
                    link: Link::home(bucket),
                };
            }
            LinkKind::Displaced { .. } => {
                // The occupant belongs to another chain; evict it so the new
                // key can claim its home position.
                self.kickout(bucket);
                return Probe::Vacant {
                    slot: bucket,
                    link: Link::home(bucket),
                };
            }
            LinkKind::Home { next } => next,
        };

        if is_match(unsafe { self.storage.entry(bucket) }.key()) {
            return Probe::Present(bucket);
        }

        if next == bucket {
            // Chain of one; extend it.
            let free = self.storage.find_empty_slot(bucket);
            self.storage.set_link(bucket, Link::home(free));
            return Probe::Vacant {
                slot: free,
                link: Link::displaced(free),
            };
        }

        let mut slot = next;
        loop {
            if is_match(unsafe { self.storage.entry(slot) }.key()) {
                return Probe::Present(slot);
            }
            let following = self.storage.link(slot).next();
            if following == slot {
                break;
            }
            slot = following;
        }

        // Append past the tail, preferring slots near it.
        let free = self.storage.find_empty_slot(slot);
        let tail_link = self.storage.link(slot).with_next(free);
        self.storage.set_link(slot, tail_link);
        Probe::Vacant {
            slot: free,
            link: Link::displaced(free),
        }
    }

    /// [`RawMap::find_or_allocate`] minus the key comparisons, for rebuilds
    /// and inserts whose key is known to be absent.
    pub(crate) fn find_unique_slot(&mut self, hash: u64) -> (u32, Link) {
        let bucket = self.home_bucket(hash);
        let next = match self.storage.link(bucket).decode() {
            LinkKind::Empty => return (bucket, Link::home(bucket)),
            LinkKind::Displaced { .. } => {
                self.kickout(bucket);
                return (bucket, Link::home(bucket));
            }
            LinkKind::Home { next } => next,
        };
        if next == bucket {
            let free = self.storage.find_empty_slot(bucket);
            self.storage.set_link(bucket, Link::home(free));
            return (free, Link::displaced(free));
        }
        let tail = self.find_tail(next);
        let free = self.storage.find_empty_slot(tail);
        let tail_link = self.storage.link(tail).with_next(free);
        self.storage.set_link(tail, tail_link);
        (free, Link::displaced(free))
    }

    /// Move the displaced occupant of `bucket` to a free slot and repair its
    /// chain, leaving `bucket` empty for a new chain root.
    fn kickout(&mut self, bucket: u32) {
        let old_link = self.storage.link(bucket);
        debug_assert!(!old_link.is_home());
        let successor = old_link.next();
        let free = self.storage.find_empty_slot(successor);
        let home = self.home_of_slot(bucket);
        let prev = self.find_prev(home, bucket);

        let entry = unsafe { self.storage.read_entry(bucket) };
        let moved_link = if successor == bucket {
            Link::displaced(free)
        } else {
            old_link
        };
        self.storage.install(free, entry, moved_link);
        let prev_link = self.storage.link(prev).with_next(free);
        self.storage.set_link(prev, prev_link);
        self.storage.vacate(bucket);
    }

    /// Chain predecessor of `slot`, starting from the chain's home.
    fn find_prev(&self, home: u32, slot: u32) -> u32 {
        let mut current = home;
        loop {
            let next = self.storage.link(current).next();
            if next == slot {
                return current;
            }
            debug_assert_ne!(next, current, "slot not reachable from its home");
            current = next;
        }
    }

    fn find_tail(&self, start: u32) -> u32 {
        let mut slot = start;
        loop {
            let next = self.storage.link(slot).next();
            if next == slot {
                return slot;
            }
            slot = next;
        }
    }

    /// Remove the entry at `slot`, repairing its chain. Returns the entry
    /// and the slot that actually became empty — erasing a chain root moves
    /// its successor back into the home position, so the freed slot can
    /// differ from `slot` (callers that sweep the table must re-examine a
    /// slot whose content was replaced this way).
    pub(crate) fn erase_slot(&mut self, slot: u32) -> (E, u32) {
        match self.storage.link(slot).decode() {
            LinkKind::Home { next } if next == slot => {
                // Sole member of its chain.
                (unsafe { self.storage.take(slot) }, slot)
            }
            LinkKind::Home { next } => {
                // Chain root with successors: pull the successor back into
                // the home position so the chain keeps its root there.
                let erased = unsafe { self.storage.read_entry(slot) };
                let successor_link = self.storage.link(next);
                let moved = unsafe { self.storage.take(next) };
                unsafe { self.storage.overwrite(slot, moved) };
                let new_next = successor_link.next();
                let root_link = if new_next == next {
                    Link::home(slot)
                } else {
                    Link::home(new_next)
                };
                self.storage.set_link(slot, root_link);
                (erased, next)
            }
            LinkKind::Displaced { next } => {
                // Mid- or end-of-chain entry: splice it out.
                let home = self.home_of_slot(slot);
                let prev = self.find_prev(home, slot);
                let target = if next == slot { prev } else { next };
                let prev_link = self.storage.link(prev).with_next(target);
                self.storage.set_link(prev, prev_link);
                (unsafe { self.storage.take(slot) }, slot)
            }
            LinkKind::Empty => unreachable!("erase of an empty slot"),
        }
    }

    pub(crate) fn remove(
        &mut self,
        hash: u64,
        is_match: impl FnMut(&E::Key) -> bool,
    ) -> Option<E> {
        let slot = self.find_index(hash, is_match)?;
        Some(self.erase_slot(slot).0)
    }

    /// Keep only the entries `keep` accepts. A removed chain root is
    /// replaced in place by its successor, which is then examined as well.
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&mut E) -> bool) {
        let mut slot = 0;
        while slot < self.storage.buckets() {
            if self.storage.is_occupied(slot) && !keep(unsafe { self.storage.entry_mut(slot) }) {
                let (entry, freed) = self.erase_slot(slot);
                drop(entry);
                if freed != slot {
                    continue;
                }
            }
            slot += 1;
        }
    }

    /// Grow (or redistribute, if the chain census says the hash degenerated)
    /// so one more entry fits under the load cap. Called before every
    /// insert.
    pub(crate) fn expand_if_needed(&mut self) {
        let filled = self.storage.filled();
        if self.adaptive
            && self.salt == 0
            && filled > policy::ADAPTIVE_MIN_FILLED
            && self.storage.home_count() * 3 < filled
        {
            // Same-size rebuild; move_into derives the salt from the ratio
            // that tripped this check.
            self.rebuild(self.storage.buckets());
        }

        let needed = u64::from(self.storage.filled()) + 1;
        if needed > policy::capacity_for(self.storage.buckets(), self.mlf) {
            let buckets =
                policy::buckets_for(needed, self.mlf).unwrap_or_else(|err| panic!("{err}"));
            self.rebuild(buckets);
        }
    }

    pub(crate) fn reserve(&mut self, additional: usize) {
        let target = u64::from(self.storage.filled()) + additional as u64;
        if target <= policy::capacity_for(self.storage.buckets(), self.mlf) {
            return;
        }
        let buckets = policy::buckets_for(target, self.mlf).unwrap_or_else(|err| panic!("{err}"));
        self.rebuild(buckets);
    }

    pub(crate) fn try_reserve(&mut self, additional: usize) -> Result<(), MapError> {
        let target = u64::from(self.storage.filled()) + additional as u64;
        if target <= policy::capacity_for(self.storage.buckets(), self.mlf) {
            return Ok(());
        }
        let buckets = policy::buckets_for(target, self.mlf)?;
        let new_storage = Storage::try_with_buckets(buckets)?;
        self.move_into(new_storage);
        Ok(())
    }

    /// Rebuild with at least `requested` buckets (rounded up to a power of
    /// two) — never fewer than the current entries need. `requested = 0`
    /// therefore shrinks to fit.
    pub(crate) fn rehash(&mut self, requested: usize) {
        let requested = u32::try_from(requested)
            .ok()
            .and_then(|n| policy::round_buckets(n).ok())
            .unwrap_or_else(|| panic!("{}", MapError::CapacityOverflow(requested as u64)));
        let fit = policy::buckets_for(u64::from(self.storage.filled()), self.mlf)
            .unwrap_or_else(|err| panic!("{err}"));
        self.rebuild(requested.max(fit));
    }

    fn rebuild(&mut self, buckets: u32) {
        self.move_into(Storage::with_buckets(buckets));
    }

    /// Migrate every entry into `new_storage` and make it current. Derives
    /// the adaptive-hash salt from the old table's chain census before the
    /// first key is rehashed.
    fn move_into(&mut self, new_storage: Storage<E>) {
        let old_buckets = self.storage.buckets();
        if self.adaptive && self.salt == 0 && self.storage.filled() > policy::ADAPTIVE_MIN_FILLED {
            let ratio = self.storage.filled() / (3 * self.storage.home_count().max(1));
            if ratio != 0 {
                self.salt = u64::from(ratio);
                info!(
                    "adaptive hashing engaged: {} entries across {} chains",
                    self.storage.filled(),
                    self.storage.home_count()
                );
            }
        }

        let mut old = mem::replace(&mut self.storage, new_storage);
        let mut slot = 0;
        while old.filled() > 0 {
            if old.is_occupied(slot) {
                let entry = unsafe { old.take_neutral(slot) };
                let hash = self.hash_of(entry.key());
                let (dest, link) = self.find_unique_slot(hash);
                self.storage.install(dest, entry, link);
            }
            slot += 1;
        }
        debug!(
            "rehash: {} -> {} buckets, {} entries in {} chains",
            old_buckets,
            self.storage.buckets(),
            self.storage.filled(),
            self.storage.home_count()
        );
    }
}

#[cfg(test)]
impl<E, S> RawMap<E, S>
where
    E: StoredEntry,
    E::Key: Hash,
    S: BuildHasher,
{
    /// Assert every structural invariant of the table at once.
    pub(crate) fn check_invariants(&self) {
        let storage = &self.storage;
        let buckets = storage.buckets();

        let occupied: Vec<u32> = (0..buckets).filter(|&i| storage.is_occupied(i)).collect();
        assert_eq!(occupied.len() as u32, storage.filled(), "filled counter");
        assert_eq!(
            storage.bitmap().empty_slots(),
            buckets - storage.filled(),
            "bitmap popcount"
        );

        let roots = occupied
            .iter()
            .filter(|&&i| storage.link(i).is_home())
            .count() as u32;
        assert_eq!(roots, storage.home_count(), "home counter");

        for &slot in &occupied {
            let home = self.home_of_slot(slot);
            assert!(
                storage.link(home).is_home(),
                "home {home} of occupied slot {slot} holds no chain root"
            );
            let mut current = home;
            let mut reached = false;
            let mut steps = 0u32;
            loop {
                assert!(storage.is_occupied(current));
                if current != home {
                    assert!(
                        !storage.link(current).is_home(),
                        "chain member {current} tagged as root"
                    );
                }
                if current == slot {
                    reached = true;
                }
                let next = storage.link(current).next();
                if next == current {
                    break;
                }
                current = next;
                steps += 1;
                assert!(steps <= buckets, "cycle in chain of home {home}");
            }
            assert!(reached, "slot {slot} unreachable from home {home}");
        }

        assert!(
            u64::from(storage.filled()) <= policy::capacity_for(buckets, self.mlf),
            "load factor above cap"
        );

        // Sentinels: empty links, bitmap reads occupied past the end.
        assert!(!storage.is_occupied(buckets));
        assert!(!storage.is_occupied(buckets + 1));
        assert_eq!(storage.bitmap().word(buckets / WORD_BITS), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::{BuildHasherDefault, Hasher};

    /// Hashes every integer to itself, so home positions are predictable.
    #[derive(Default)]
    struct IdentityHasher {
        state: u64,
    }

    impl Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.state
        }

        fn write(&mut self, _: &[u8]) {
            unimplemented!("identity hashing is for integer keys only")
        }

        fn write_u64(&mut self, n: u64) {
            self.state = n;
        }

        fn write_u32(&mut self, n: u32) {
            self.state = u64::from(n);
        }

        fn write_usize(&mut self, n: usize) {
            self.state = n as u64;
        }
    }

    type Identity = BuildHasherDefault<IdentityHasher>;

    fn identity_map() -> RawMap<(u64, u64), Identity> {
        let options = TableOptions::default().adaptive_hashing(false);
        RawMap::with_options(&options, Identity::default())
    }

    fn insert(map: &mut RawMap<(u64, u64), Identity>, key: u64, value: u64) -> u32 {
        map.expand_if_needed();
        let hash = map.hash_of(&key);
        match map.find_or_allocate(hash, |k| *k == key) {
            Probe::Present(slot) => {
                unsafe { map.storage.entry_mut(slot) }.1 = value;
                slot
            }
            Probe::Vacant { slot, link } => {
                map.storage.install(slot, (key, value), link);
                slot
            }
        }
    }

    fn find(map: &RawMap<(u64, u64), Identity>, key: u64) -> Option<u32> {
        map.find_index(map.hash_of(&key), |k| *k == key)
    }

    #[test]
    fn test_distinct_homes_no_chains() {
        let mut map = identity_map();
        for key in 1..=3 {
            insert(&mut map, key, key * 10);
        }
        // Identity hash, no collisions: each key sits in its home slot as a
        // chain of one.
        for key in 1..=3 {
            assert_eq!(find(&map, key), Some(key as u32));
        }
        assert_eq!(map.storage.home_count(), 3);
        assert_eq!(map.storage.filled(), 3);
        map.check_invariants();
    }

    #[test]
    fn test_colliding_keys_chain_from_home() {
        let mut map = identity_map();
        // 0, 64, 128 all mask to home 0 in a 64-bucket table.
        let slot_a = insert(&mut map, 0, 1);
        let slot_b = insert(&mut map, 64, 2);
        let slot_c = insert(&mut map, 128, 3);

        assert_eq!(slot_a, 0);
        // The bitmap scan hands out the nearest free slots after home 0.
        assert_eq!(slot_b, 1);
        assert_eq!(slot_c, 2);
        assert_eq!(map.storage.home_count(), 1);

        for key in [0, 64, 128] {
            assert!(find(&map, key).is_some(), "key {key} lost");
        }
        map.check_invariants();
    }

    #[test]
    fn test_kickout_restores_displaced_entry() {
        let mut map = identity_map();
        insert(&mut map, 67, 1); // home 3, chain root at slot 3
        let displaced_slot = insert(&mut map, 131, 2); // home 3, displaced
        assert_eq!(displaced_slot, 4);

        // Key 4's home is slot 4, currently held by the displaced 131:
        // inserting it must evict 131 and claim the slot.
        let slot = insert(&mut map, 4, 3);
        assert_eq!(slot, 4);

        assert_eq!(find(&map, 4), Some(4));
        let moved = find(&map, 131).expect("displaced entry lost by kickout");
        assert_ne!(moved, 4);
        assert_eq!(find(&map, 67), Some(3));
        map.check_invariants();
    }

    #[test]
    fn test_erase_sole_root_empties_home() {
        let mut map = identity_map();
        insert(&mut map, 9, 90);
        let removed = map.remove(map.hash_of(&9u64), |k| *k == 9);
        assert_eq!(removed, Some((9, 90)));
        assert!(!map.storage.is_occupied(9));
        assert!(map.storage.bitmap().is_empty_slot(9));
        assert_eq!(map.storage.filled(), 0);
        assert_eq!(map.storage.home_count(), 0);
        map.check_invariants();
    }

    #[test]
    fn test_erase_root_compacts_successor_into_home() {
        let mut map = identity_map();
        insert(&mut map, 0, 1); // home 0
        insert(&mut map, 64, 2); // chains behind it
        let removed = map.remove(map.hash_of(&0u64), |k| *k == 0);
        assert_eq!(removed, Some((0, 1)));

        // The survivor must now be the chain root in the home slot itself.
        assert_eq!(find(&map, 64), Some(0));
        assert!(map.storage.link(0).is_home());
        assert_eq!(map.storage.link(0).next(), 0);
        map.check_invariants();
    }

    #[test]
    fn test_erase_middle_of_chain_splices() {
        let mut map = identity_map();
        for key in [0, 64, 128, 192] {
            insert(&mut map, key, key);
        }
        let removed = map.remove(map.hash_of(&128u64), |k| *k == 128);
        assert_eq!(removed, Some((128, 128)));
        for key in [0, 64, 192] {
            assert!(find(&map, key).is_some(), "key {key} lost by splice");
        }
        assert_eq!(find(&map, 128), None);
        map.check_invariants();
    }

    #[test]
    fn test_find_empty_slot_prefers_nearby() {
        let mut map = identity_map();
        for key in 0..8 {
            insert(&mut map, key, key);
        }
        // Slots 0..8 occupied; the next free one after 0 is 8.
        assert_eq!(map.storage.find_empty_slot(0), 8);
        assert_eq!(map.storage.find_empty_slot(20), 20);
    }

    #[test]
    fn test_growth_keeps_membership_and_load() {
        let mut map = identity_map();
        for key in 0..1000 {
            insert(&mut map, key * 3, key);
        }
        assert_eq!(map.len(), 1000);
        assert!(map.load_factor() <= map.max_load_factor());
        for key in 0..1000 {
            assert!(find(&map, key * 3).is_some(), "key {} lost", key * 3);
        }
        map.check_invariants();
    }

    #[test]
    fn test_rehash_same_size_is_stable() {
        let mut map = identity_map();
        for key in 0..40 {
            insert(&mut map, key, key);
        }
        let before = map.bucket_count();
        map.rehash(before);
        assert_eq!(map.bucket_count(), before);
        // Identity hash and a clean table: every key returns to its home.
        for key in 0..40 {
            assert_eq!(find(&map, key), Some(key as u32));
        }
        map.check_invariants();
    }

    #[test]
    fn test_cursor_walks_all_occupied_slots() {
        let mut map = identity_map();
        let keys = [3u64, 17, 64 + 3, 50];
        for &key in &keys {
            insert(&mut map, key, key);
        }
        let mut cursor = map.begin();
        let mut seen = Vec::new();
        while let Some(slot) = cursor.next(map.storage.bitmap()) {
            seen.push(unsafe { map.storage.entry(slot) }.0);
        }
        seen.sort_unstable();
        let mut expected: Vec<u64> = keys.to_vec();
        expected.sort_unstable();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_retain_reexamines_compacted_slot() {
        let mut map = identity_map();
        // One long chain at home 0.
        for key in [0u64, 64, 128, 192, 256] {
            insert(&mut map, key, key);
        }
        map.retain(|entry| entry.0 % 128 != 0);
        assert_eq!(map.len(), 2);
        assert!(find(&map, 64).is_some());
        assert!(find(&map, 192).is_some());
        assert!(find(&map, 0).is_none());
        map.check_invariants();
    }

    #[test]
    fn test_adaptive_salt_engages_on_degenerate_hash() {
        let options = TableOptions::default();
        let mut map: RawMap<(u64, u64), Identity> =
            RawMap::with_options(&options, Identity::default());
        // Keys crafted so nearly everything collides on home 0 at every
        // table size up to 4096 buckets.
        for i in 0..200u64 {
            let key = i * 4096;
            map.expand_if_needed();
            let hash = map.hash_of(&key);
            match map.find_or_allocate(hash, |k| *k == key) {
                Probe::Present(_) => unreachable!(),
                Probe::Vacant { slot, link } => map.storage.install(slot, (key, i), link),
            }
        }
        assert_ne!(map.salt, 0, "salt never engaged");
        // Redistribution must not lose anything.
        for i in 0..200u64 {
            let key = i * 4096;
            assert!(
                map.find_index(map.hash_of(&key), |k| *k == key).is_some(),
                "key {key} lost after salting"
            );
        }
        map.check_invariants();
    }
}
