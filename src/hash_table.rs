use alloc::boxed::Box;
use alloc::vec::Vec;
use core::alloc::Layout;
use core::fmt::Debug;

use crate::bucket::BUCKET_SIZE;
use crate::bucket::EMPTY_REST;
use crate::bucket::Bucket;
use crate::bucket::PutOutcome;
use crate::bucket::top_hash;
use crate::error::TryReserveError;
use crate::iter::RawIter;

/// Average number of entries per bucket that triggers growth, as a fraction.
const LOAD_FACTOR_NUM: usize = 13;
const LOAD_FACTOR_DEN: usize = 2;

/// Overflow links tolerated per bucket array are capped at `1 << 15`.
#[cfg(feature = "same-size-grow")]
const MAX_OVERFLOW_SHIFT: u8 = 15;

#[inline(always)]
pub(crate) fn bucket_mask(b: u8) -> usize {
    (1usize << b) - 1
}

/// Whether `count` entries exceed the load factor of `2^b` buckets.
#[inline(always)]
pub(crate) fn over_load_factor(count: usize, b: u8) -> bool {
    count > BUCKET_SIZE
        && count > LOAD_FACTOR_NUM.saturating_mul((1usize << b) / LOAD_FACTOR_DEN)
}

#[cfg(feature = "same-size-grow")]
#[inline(always)]
fn too_many_overflow_buckets(overflow_buckets: usize, b: u8) -> bool {
    overflow_buckets >= 1usize << b.min(MAX_OVERFLOW_SHIFT)
}

pub(crate) fn alloc_buckets<K, V>(b: u8) -> Result<Box<[Bucket<K, V>]>, TryReserveError> {
    let len = 1usize
        .checked_shl(u32::from(b))
        .ok_or(TryReserveError::CapacityOverflow)?;
    let layout =
        Layout::array::<Bucket<K, V>>(len).map_err(|_| TryReserveError::CapacityOverflow)?;

    let mut buckets = Vec::new();
    buckets
        .try_reserve_exact(len)
        .map_err(|_| TryReserveError::AllocError { layout })?;
    buckets.resize_with(len, Bucket::new);

    Ok(buckets.into_boxed_slice())
}

/// Debug statistics for hash table analysis.
///
/// Compiled only with `cfg(test)` or the `stats` feature.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of elements currently in the table
    pub populated: usize,
    /// Maximum load before the next doubling
    pub capacity: usize,
    /// Number of buckets in the current array
    pub bucket_count: usize,
    /// Number of buckets in the array being evacuated, zero when not growing
    pub old_bucket_count: usize,
    /// Old buckets below this index are known to be evacuated
    pub evacuated: usize,
    /// Whether the running growth keeps the bucket count
    pub same_size_grow: bool,
    /// Overflow links hanging off the current array
    pub overflow_buckets: usize,
    /// Links in the longest chain of either array
    pub longest_chain: usize,
    /// Load factor (populated / capacity)
    pub load_factor: f64,
    /// Slot utilization (populated / slots allocated in the current array)
    pub slot_utilization: f64,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the debug statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Bucket Map Debug Statistics ===");
        println!(
            "Population: {}/{} ({:.2}% load factor)",
            self.populated,
            self.capacity,
            self.load_factor * 100.0
        );
        println!(
            "Buckets: {} ({} overflow links, longest chain {})",
            self.bucket_count, self.overflow_buckets, self.longest_chain
        );
        println!("Slot Usage: {:.2}%", self.slot_utilization * 100.0);
        if self.old_bucket_count > 0 {
            println!(
                "Growing{}: {}/{} old buckets evacuated",
                if self.same_size_grow {
                    " (same size)"
                } else {
                    ""
                },
                self.evacuated,
                self.old_bucket_count
            );
        }
    }
}

/// A chained-bucket hash table that grows incrementally.
///
/// `HashTable<K, V>` stores key/value pairs in buckets of eight slots, each
/// bucket extended by a chain of overflow links. Unlike
/// [`HashMap`](crate::HashMap), the caller supplies the hash of every key, so
/// any hashing scheme can be layered on top.
///
/// Growth never rehashes everything at once. When an insert would overload
/// the table, a bucket array of twice the size is allocated, and each later
/// insert moves (evacuates) at most two buckets of the old array into the new
/// one. Lookups consult whichever array currently holds a key. Because entries
/// are re-bucketed during evacuation, `insert` needs a `hasher` that maps keys
/// back to the hash they were inserted with.
///
/// ## Example
///
/// ```rust
/// # use core::hash::Hash;
/// # use core::hash::Hasher;
/// #
/// # use bucket_map::hash_table::HashTable;
/// # use siphasher::sip::SipHasher;
/// #
/// # fn hash_id(id: &u64) -> u64 {
/// #     let mut hasher = SipHasher::new();
/// #     id.hash(&mut hasher);
/// #     hasher.finish()
/// # }
/// #
/// let mut table = HashTable::with_capacity(100);
///
/// table.insert(hash_id(&123), 123u64, "Alice", hash_id);
/// assert_eq!(
///     table.find(hash_id(&123), |id| *id == 123),
///     Some((&123, &"Alice"))
/// );
/// ```
pub struct HashTable<K, V> {
    pub(crate) buckets: Box<[Bucket<K, V>]>,
    /// Previous array, present while evacuation is in progress.
    pub(crate) old_buckets: Option<Box<[Bucket<K, V>]>>,

    pub(crate) populated: usize,
    /// log2 of `buckets.len()`.
    pub(crate) b: u8,
    /// Evacuation mark: old buckets below it are evacuated.
    pub(crate) evacuated: usize,
    /// Approximate count of overflow links in `buckets`.
    pub(crate) overflow_buckets: usize,
    pub(crate) same_size_grow: bool,
}

impl<K, V> Debug for HashTable<K, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use alloc::format;
        use alloc::string::String;
        use alloc::string::ToString;

        fn tag_dump<K, V>(buckets: &[Bucket<K, V>]) -> Vec<String> {
            buckets
                .iter()
                .map(|root| {
                    root.chain()
                        .map(|link| {
                            let mut items = Vec::new();
                            for index in 0..BUCKET_SIZE {
                                match link.tag(index) {
                                    EMPTY_REST => items.push("..".to_string()),
                                    top => items.push(format!("{top:02x}")),
                                }
                            }
                            items.join(" ")
                        })
                        .collect::<Vec<_>>()
                        .join(" -> ")
                })
                .collect()
        }

        f.debug_struct("HashTable")
            .field("populated", &self.populated)
            .field("b", &self.b)
            .field("evacuated", &self.evacuated)
            .field("same_size_grow", &self.same_size_grow)
            .field("overflow_buckets", &self.overflow_buckets)
            .field("buckets", &tag_dump(&self.buckets))
            .field("old_buckets", &self.old_buckets.as_deref().map(tag_dump))
            .finish()
    }
}

impl<K, V> Clone for HashTable<K, V>
where
    K: Clone,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            buckets: self.buckets.clone(),
            old_buckets: self.old_buckets.clone(),
            populated: self.populated,
            b: self.b,
            evacuated: self.evacuated,
            overflow_buckets: self.overflow_buckets,
            same_size_grow: self.same_size_grow,
        }
    }
}

impl<K, V> HashTable<K, V> {
    /// Creates a new hash table able to hold `capacity` entries before it
    /// starts growing.
    ///
    /// # Panics
    ///
    /// Panics if the bucket array size overflows, and aborts through
    /// [`handle_alloc_error`](alloc::alloc::handle_alloc_error) if allocation
    /// fails.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bucket_map::hash_table::HashTable;
    /// #
    /// let table: HashTable<u64, String> = HashTable::with_capacity(100);
    /// assert!(table.capacity() >= 100);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        match Self::try_with_capacity(capacity) {
            Ok(table) => table,
            Err(err) => err.handle(),
        }
    }

    /// Fallible version of [`with_capacity`](Self::with_capacity).
    pub fn try_with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        let mut b = 0;
        while over_load_factor(capacity, b) {
            b += 1;
        }

        Ok(Self {
            buckets: alloc_buckets(b)?,
            old_buckets: None,
            populated: 0,
            b,
            evacuated: 0,
            overflow_buckets: 0,
            same_size_grow: false,
        })
    }

    /// Returns the number of entries in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.populated
    }

    /// Returns `true` if the table contains no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.populated == 0
    }

    /// Returns the number of entries the current bucket array holds before
    /// the next doubling starts.
    pub fn capacity(&self) -> usize {
        BUCKET_SIZE.max(LOAD_FACTOR_NUM.saturating_mul(self.buckets.len() / LOAD_FACTOR_DEN))
    }

    /// Returns the number of buckets in the current array.
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Returns `true` while entries are still being moved out of a previous
    /// bucket array.
    #[inline]
    pub fn is_growing(&self) -> bool {
        self.old_buckets.is_some()
    }

    /// Removes every entry, keeping the current bucket array.
    ///
    /// A growth in progress is abandoned along with the old array.
    pub fn clear(&mut self) {
        self.old_buckets = None;
        for bucket in self.buckets.iter_mut() {
            *bucket = Bucket::new();
        }
        self.populated = 0;
        self.evacuated = 0;
        self.overflow_buckets = 0;
        self.same_size_grow = false;
    }

    /// The chain currently holding keys with `hash`: the old bucket while it
    /// waits for evacuation, otherwise the bucket in the current array.
    fn chain_for(&self, hash: u64) -> &Bucket<K, V> {
        if let Some(old_buckets) = self.old_buckets.as_deref() {
            let old = &old_buckets[hash as usize & (old_buckets.len() - 1)];
            if !old.is_evacuated() {
                return old;
            }
        }
        &self.buckets[hash as usize & bucket_mask(self.b)]
    }

    fn chain_for_mut(&mut self, hash: u64) -> &mut Bucket<K, V> {
        if let Some(old_buckets) = self.old_buckets.as_deref_mut() {
            let old_index = hash as usize & (old_buckets.len() - 1);
            if !old_buckets[old_index].is_evacuated() {
                return &mut old_buckets[old_index];
            }
        }
        &mut self.buckets[hash as usize & bucket_mask(self.b)]
    }

    /// Finds the entry for `hash` whose key satisfies `eq`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bucket_map::hash_table::HashTable;
    /// #
    /// let mut table = HashTable::with_capacity(4);
    /// table.insert(42, "answer", 0, |_| 42);
    ///
    /// assert_eq!(table.find(42, |k| *k == "answer"), Some((&"answer", &0)));
    /// assert_eq!(table.find(42, |k| *k == "question"), None);
    /// ```
    pub fn find(&self, hash: u64, eq: impl Fn(&K) -> bool) -> Option<(&K, &V)> {
        self.chain_for(hash).get(top_hash(hash), eq)
    }

    /// Finds the entry for `hash` whose key satisfies `eq`, returning a
    /// mutable reference to its value.
    pub fn find_mut(&mut self, hash: u64, eq: impl Fn(&K) -> bool) -> Option<(&K, &mut V)> {
        self.chain_for_mut(hash).get_mut(top_hash(hash), eq)
    }

    /// Removes and returns the entry for `hash` whose key satisfies `eq`.
    ///
    /// Removal never advances a growth in progress.
    pub fn remove(&mut self, hash: u64, eq: impl Fn(&K) -> bool) -> Option<(K, V)> {
        let removed = self.chain_for_mut(hash).delete(top_hash(hash), eq)?;
        self.populated -= 1;
        Some(removed)
    }

    /// Inserts `key` with `value`, returning the previous value if the key was
    /// already present.
    ///
    /// `hasher` must return, for every stored key, the `hash` that key was
    /// inserted with; it is used to re-bucket entries while growing.
    ///
    /// # Panics
    ///
    /// Panics or aborts like [`with_capacity`](Self::with_capacity) if the
    /// table has to grow and cannot.
    pub fn insert(&mut self, hash: u64, key: K, value: V, hasher: impl Fn(&K) -> u64) -> Option<V>
    where
        K: Eq,
    {
        match self.try_insert(hash, key, value, hasher) {
            Ok(previous) => previous,
            Err(err) => err.handle(),
        }
    }

    /// Fallible version of [`insert`](Self::insert).
    ///
    /// On error the table is left untouched and `key` and `value` are
    /// dropped.
    pub fn try_insert(
        &mut self,
        hash: u64,
        key: K,
        value: V,
        hasher: impl Fn(&K) -> u64,
    ) -> Result<Option<V>, TryReserveError>
    where
        K: Eq,
    {
        if !self.is_growing() && self.needs_growth() {
            self.start_growth()?;
        }

        let index = hash as usize & bucket_mask(self.b);
        if self.is_growing() {
            self.grow_work(index, &hasher);
        }

        match self.buckets[index].put(top_hash(hash), key, value) {
            PutOutcome::Replaced(previous) => Ok(Some(previous)),
            PutOutcome::Inserted { new_link } => {
                self.populated += 1;
                if new_link {
                    self.overflow_buckets += 1;
                }
                Ok(None)
            }
        }
    }

    fn needs_growth(&self) -> bool {
        if over_load_factor(self.populated + 1, self.b) {
            return true;
        }

        #[cfg(feature = "same-size-grow")]
        if too_many_overflow_buckets(self.overflow_buckets, self.b) {
            return true;
        }

        false
    }

    /// Returns an iterator over all entries, starting at a position derived
    /// from `seed`.
    ///
    /// Every entry is yielded exactly once. The order depends on `seed` and
    /// is otherwise unspecified. `hasher` has the same contract as in
    /// [`insert`](Self::insert) and is only consulted while a growth is in
    /// progress.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bucket_map::hash_table::HashTable;
    /// #
    /// let mut table = HashTable::with_capacity(10);
    /// for k in 0..10u64 {
    ///     table.insert(k, k, k * 2, |k| *k);
    /// }
    ///
    /// let mut doubled: Vec<_> = table.iter(7, |k| *k).map(|(_, v)| *v).collect();
    /// doubled.sort();
    /// assert_eq!(doubled, (0..10).map(|k| k * 2).collect::<Vec<_>>());
    /// ```
    pub fn iter<F>(&self, seed: u64, hasher: F) -> Iter<'_, K, V, F>
    where
        F: Fn(&K) -> u64,
    {
        Iter {
            raw: RawIter::new(self, seed),
            hasher,
        }
    }

    /// Returns statistics about bucket and chain usage.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        let chain_len = |root: &Bucket<K, V>| root.chain().count();
        let longest_chain = self
            .buckets
            .iter()
            .chain(self.old_buckets.iter().flat_map(|old| old.iter()))
            .map(chain_len)
            .max()
            .unwrap_or(0);
        let overflow_buckets = self
            .buckets
            .iter()
            .map(|root| chain_len(root) - 1)
            .sum();
        let capacity = self.capacity();
        let total_slots = self.buckets.len() * BUCKET_SIZE;

        DebugStats {
            populated: self.populated,
            capacity,
            bucket_count: self.buckets.len(),
            old_bucket_count: self.old_buckets.as_deref().map_or(0, <[_]>::len),
            evacuated: self.evacuated,
            same_size_grow: self.same_size_grow,
            overflow_buckets,
            longest_chain,
            load_factor: self.populated as f64 / capacity as f64,
            slot_utilization: self.populated as f64 / total_slots as f64,
        }
    }
}

/// Iterator over the entries of a [`HashTable`].
///
/// Created by [`HashTable::iter`].
pub struct Iter<'a, K, V, F> {
    raw: RawIter<'a, K, V>,
    hasher: F,
}

impl<'a, K, V, F> Iterator for Iter<'a, K, V, F>
where
    F: Fn(&K) -> u64,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.raw.next(&self.hasher)
    }
}
