//! Randomized iteration over a table that may be in the middle of growing.
//!
//! Both iterators visit *logical* buckets: bucket indices under the bucket
//! count the iteration started with. While a growth is in progress a logical
//! bucket may still live in the old array, in which case only the entries
//! that will evacuate into it are reported.

use alloc::vec::Vec;
use core::hash::BuildHasher;
use core::hash::Hash;

use crate::bucket::BUCKET_SIZE;
use crate::bucket::Bucket;
use crate::hash_map::HashMap;
use crate::hash_table::HashTable;
use crate::hash_table::bucket_mask;

/// Starting position of an iteration, derived from a random draw.
#[derive(Debug, Clone, Copy)]
struct Start {
    bucket: usize,
    offset: usize,
}

impl Start {
    fn new(b: u8, seed: u64) -> Self {
        let r = seed as usize;
        Self {
            bucket: r & bucket_mask(b),
            offset: (r >> b) & (BUCKET_SIZE - 1),
        }
    }
}

/// Position among the logical buckets of a `2^b` array, walked once around
/// from `start`.
#[derive(Debug, Clone)]
struct Walk {
    start: Start,
    b: u8,
    next_bucket: usize,
    wrapped: bool,
}

impl Walk {
    fn new(b: u8, seed: u64) -> Self {
        let start = Start::new(b, seed);
        Self {
            start,
            b,
            next_bucket: start.bucket,
            wrapped: false,
        }
    }

    /// Returns the next logical bucket, or `None` once every bucket was
    /// handed out.
    fn advance(&mut self) -> Option<usize> {
        if self.wrapped && self.next_bucket == self.start.bucket {
            return None;
        }

        let bucket = self.next_bucket;
        self.next_bucket = (bucket + 1) & bucket_mask(self.b);
        if self.next_bucket == 0 {
            self.wrapped = true;
        }
        Some(bucket)
    }

    #[inline]
    fn slot(&self, index: usize) -> usize {
        (index + self.start.offset) & (BUCKET_SIZE - 1)
    }
}

impl<K, V> HashTable<K, V> {
    /// Number of physical chains making up logical bucket `b` of a `2^g`
    /// iteration, `g <= self.b`.
    pub(crate) fn logical_sources(&self, g: u8) -> usize {
        1 << (self.b - g)
    }

    /// Resolves source `k` of logical bucket `bucket` under a `2^g` iteration.
    ///
    /// Returns the chain to walk and, when that chain is an old bucket that
    /// also holds entries of a sibling logical bucket, the bucket index
    /// entries must hash to under `2^g` in order to be reported. Returns
    /// `None` for sources already covered by a previous `k`.
    pub(crate) fn logical_source(
        &self,
        g: u8,
        bucket: usize,
        k: usize,
    ) -> Option<(&Bucket<K, V>, Option<usize>)> {
        debug_assert!(g <= self.b);
        let index = bucket + (k << g);

        if let Some(old_buckets) = self.old_buckets.as_deref() {
            let old_mask = old_buckets.len() - 1;
            let old = &old_buckets[index & old_mask];
            if !old.is_evacuated() {
                if g < self.b && index > old_mask {
                    // The old chain was already visited through its lower
                    // index.
                    return None;
                }
                let check = (!self.same_size_grow && g == self.b).then_some(bucket);
                return Some((old, check));
            }
        }

        Some((&self.buckets[index], None))
    }
}

/// The iteration engine shared by [`hash_table::Iter`](crate::hash_table::Iter)
/// and the map iterators. It borrows the table, so the table cannot change
/// underneath it.
pub(crate) struct RawIter<'a, K, V> {
    table: &'a HashTable<K, V>,
    walk: Walk,

    /// Logical bucket whose sources are being visited.
    bucket: usize,
    source: usize,
    sources: usize,
    link: Option<&'a Bucket<K, V>>,
    index: usize,
    check_bucket: Option<usize>,

    exhausted: bool,
}

impl<'a, K, V> RawIter<'a, K, V> {
    pub(crate) fn new(table: &'a HashTable<K, V>, seed: u64) -> Self {
        let walk = Walk::new(table.b, seed);
        Self {
            table,
            bucket: walk.start.bucket,
            walk,
            source: 0,
            sources: 0,
            link: None,
            index: 0,
            check_bucket: None,
            exhausted: table.is_empty(),
        }
    }

    pub(crate) fn next(&mut self, hasher: &impl Fn(&K) -> u64) -> Option<(&'a K, &'a V)> {
        if self.exhausted {
            return None;
        }

        loop {
            let Some(link) = self.link else {
                if !self.open_next_chain() {
                    self.exhausted = true;
                    return None;
                }
                continue;
            };

            while self.index < BUCKET_SIZE {
                let slot = self.walk.slot(self.index);
                self.index += 1;

                let Some((key, value)) = link.entry(slot) else {
                    continue;
                };
                if let Some(check) = self.check_bucket {
                    if hasher(key) as usize & bucket_mask(self.walk.b) != check {
                        continue;
                    }
                }
                return Some((key, value));
            }

            self.link = link.overflow();
            self.index = 0;
        }
    }

    fn open_next_chain(&mut self) -> bool {
        loop {
            while self.source < self.sources {
                let source = self.source;
                self.source += 1;

                if let Some((root, check)) =
                    self.table.logical_source(self.walk.b, self.bucket, source)
                {
                    self.link = Some(root);
                    self.check_bucket = check;
                    self.index = 0;
                    return true;
                }
            }

            let Some(bucket) = self.walk.advance() else {
                return false;
            };
            self.bucket = bucket;
            self.source = 0;
            self.sources = self.table.logical_sources(self.walk.b);
        }
    }
}

/// An iterator over the key-value pairs of a `HashMap`.
///
/// Created by [`HashMap::iter`].
pub struct Iter<'a, K, V, S> {
    raw: RawIter<'a, K, V>,
    hash_builder: &'a S,
}

impl<'a, K, V, S> Iter<'a, K, V, S> {
    pub(crate) fn new(raw: RawIter<'a, K, V>, hash_builder: &'a S) -> Self {
        Self { raw, hash_builder }
    }
}

impl<'a, K, V, S> Iterator for Iter<'a, K, V, S>
where
    K: Hash,
    S: BuildHasher,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let hash_builder = self.hash_builder;
        self.raw.next(&|k: &K| hash_builder.hash_one(k))
    }
}

/// An iterator over the keys of a `HashMap`.
pub struct Keys<'a, K, V, S> {
    inner: Iter<'a, K, V, S>,
}

impl<'a, K, V, S> Keys<'a, K, V, S> {
    pub(crate) fn new(inner: Iter<'a, K, V, S>) -> Self {
        Self { inner }
    }
}

impl<'a, K, V, S> Iterator for Keys<'a, K, V, S>
where
    K: Hash,
    S: BuildHasher,
{
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }
}

/// An iterator over the values of a `HashMap`.
pub struct Values<'a, K, V, S> {
    inner: Iter<'a, K, V, S>,
}

impl<'a, K, V, S> Values<'a, K, V, S> {
    pub(crate) fn new(inner: Iter<'a, K, V, S>) -> Self {
        Self { inner }
    }
}

impl<'a, K, V, S> Iterator for Values<'a, K, V, S>
where
    K: Hash,
    S: BuildHasher,
{
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }
}

/// A detached iterator over a [`HashMap`] that tolerates inserts and removals
/// between steps.
///
/// A cursor holds no borrow of the map; each call to [`next`](Self::next)
/// borrows it only for that step. Between steps the map may be modified
/// freely, including growth. For a cursor created by
/// [`HashMap::cursor`]:
///
/// - every key present for the whole iteration is yielded exactly once;
/// - a key removed before the cursor reaches it is not yielded;
/// - a key inserted after creation may or may not be yielded, but at most
///   once;
/// - the value yielded for a key is the one stored when the key is yielded.
///
/// Keys of one logical bucket are snapshotted (cloned) when the cursor
/// arrives at that bucket and each is looked up again before being yielded.
///
/// # Examples
///
/// ```rust
/// use bucket_map::HashMap;
///
/// let mut map = HashMap::new();
/// for k in 0..10 {
///     map.insert(k, k * 10);
/// }
///
/// let mut cursor = map.cursor();
/// let mut seen = Vec::new();
/// while let Some((&k, _)) = cursor.next(&map) {
///     seen.push(k);
///     // Growth in the middle of iterating does not upset the cursor.
///     map.insert(100 + k, 0);
/// }
///
/// seen.retain(|k| *k < 10);
/// seen.sort();
/// assert_eq!(seen, (0..10).collect::<Vec<_>>());
/// ```
#[derive(Debug, Clone)]
pub struct Cursor<K> {
    walk: Walk,
    pending: Vec<K>,
    exhausted: bool,
}

impl<K> Cursor<K> {
    pub(crate) fn new<V>(table: &HashTable<K, V>, seed: u64) -> Self {
        Self {
            walk: Walk::new(table.b, seed),
            pending: Vec::new(),
            exhausted: table.is_empty(),
        }
    }

    /// Returns `true` once the cursor has yielded its last entry.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.pending.is_empty()
    }

    /// Advances the cursor over `map`, returning the next entry.
    ///
    /// `map` must be the map the cursor was created from. Passing another map
    /// is memory safe but yields an unspecified subset of its entries.
    pub fn next<'m, V, S>(&mut self, map: &'m HashMap<K, V, S>) -> Option<(&'m K, &'m V)>
    where
        K: Hash + Eq + Clone,
        S: BuildHasher,
    {
        loop {
            if let Some(key) = self.pending.pop() {
                if let Some(entry) = map.get_key_value(&key) {
                    return Some(entry);
                }
                continue;
            }

            if self.exhausted {
                return None;
            }
            if !self.snapshot_next_bucket(map.table(), |k| map.hash_key(k)) {
                self.exhausted = true;
                return None;
            }
        }
    }

    /// Clones the keys of the next logical bucket into `pending`, in yield
    /// order. Returns `false` when no bucket is left.
    fn snapshot_next_bucket<V>(
        &mut self,
        table: &HashTable<K, V>,
        hasher: impl Fn(&K) -> u64,
    ) -> bool
    where
        K: Clone,
    {
        // The table only ever grows, a smaller one is not the one we started on.
        if self.walk.b > table.b {
            return false;
        }
        let Some(bucket) = self.walk.advance() else {
            return false;
        };

        let mask = bucket_mask(self.walk.b);
        for source in 0..table.logical_sources(self.walk.b) {
            let Some((root, check)) = table.logical_source(self.walk.b, bucket, source) else {
                continue;
            };

            for link in root.chain() {
                for index in 0..BUCKET_SIZE {
                    let Some((key, _)) = link.entry(self.walk.slot(index)) else {
                        continue;
                    };
                    if check.is_some_and(|check| hasher(key) as usize & mask != check) {
                        continue;
                    }
                    self.pending.push(key.clone());
                }
            }
        }
        self.pending.reverse();

        true
    }
}

#[cfg(test)]
mod tests {
    use alloc::collections::BTreeSet;
    use alloc::vec;

    use super::*;

    fn identity(key: &u64) -> u64 {
        *key
    }

    fn table_with(keys: impl IntoIterator<Item = u64>) -> HashTable<u64, u64> {
        let mut table = HashTable::with_capacity(0);
        for k in keys {
            table.insert(k, k, k * 2, identity);
        }
        table
    }

    fn collect(table: &HashTable<u64, u64>, seed: u64) -> Vec<u64> {
        table
            .iter(seed, identity)
            .map(|(k, v)| {
                assert_eq!(*v, k * 2);
                *k
            })
            .collect()
    }

    #[test]
    fn walk_visits_each_bucket_once() {
        for b in 0..6u8 {
            for seed in [0u64, 1, 7, 0xDEAD_BEEF, u64::MAX] {
                let mut walk = Walk::new(b, seed);
                let mut seen = vec![0; 1 << b];
                while let Some(bucket) = walk.advance() {
                    seen[bucket] += 1;
                }
                assert!(seen.iter().all(|&n| n == 1), "b={b} seed={seed}: {seen:?}");
                assert_eq!(walk.advance(), None);
            }
        }
    }

    #[test]
    fn start_position_is_derived_from_the_draw() {
        let start = Start::new(3, 0b101_011);
        assert_eq!(start.bucket, 0b011);
        assert_eq!(start.offset, 0b101);

        let start = Start::new(0, 6);
        assert_eq!(start.bucket, 0);
        assert_eq!(start.offset, 6);
    }

    #[test]
    fn empty_table_yields_nothing() {
        let table: HashTable<u64, u64> = HashTable::with_capacity(100);
        assert_eq!(collect(&table, 3), vec![]);
    }

    #[test]
    fn yields_every_entry_once() {
        let table = table_with(0..1_000);
        for seed in [0, 1, 2, 99, u64::MAX] {
            let keys = collect(&table, seed);
            assert_eq!(keys.len(), 1_000);
            assert_eq!(keys.into_iter().collect::<BTreeSet<_>>(), (0..1_000).collect());
        }
    }

    #[test]
    fn different_seeds_change_the_order() {
        let table = table_with(0..100);
        let orders: BTreeSet<Vec<u64>> = (0..16)
            .map(|seed| collect(&table, seed * 0x9E37_79B9))
            .collect();
        assert!(orders.len() > 1);
    }

    #[test]
    fn iterating_mid_growth_reports_each_entry_once() {
        for capacity in [0, 52, 100, 1_000] {
            let mut table = table_with(0..capacity as u64);
            let mut k = capacity as u64;
            while !table.is_growing() {
                table.insert(k, k, k * 2, identity);
                k += 1;
            }
            let old_len = table.old_buckets.as_deref().map_or(0, <[_]>::len);

            // Probe several points of the evacuation.
            while table.is_growing() {
                assert!(table.evacuated < old_len);
                for seed in [0, 5, 13] {
                    let keys = collect(&table, seed);
                    assert_eq!(keys.len(), k as usize, "{table:#?}");
                    assert_eq!(keys.into_iter().collect::<BTreeSet<_>>(), (0..k).collect());
                }
                table.insert(k, k, k * 2, identity);
                k += 1;
            }
        }
    }

    #[test]
    fn logical_sources_cover_a_grown_table_once() {
        let mut table = table_with(0..20);
        let g = table.b;
        for k in 20..2_000 {
            table.insert(k, k, k * 2, identity);
        }
        assert!(table.b > g);
        assert_eq!(table.logical_sources(g), 1 << (table.b - g));

        let mut seen = BTreeSet::new();
        for bucket in 0..1usize << g {
            for source in 0..table.logical_sources(g) {
                let Some((root, check)) = table.logical_source(g, bucket, source) else {
                    continue;
                };
                for link in root.chain() {
                    for index in 0..BUCKET_SIZE {
                        if let Some((key, _)) = link.entry(index) {
                            if check.is_none_or(|check| (*key as usize & bucket_mask(g)) == check) {
                                assert_eq!(*key as usize & bucket_mask(g), bucket);
                                assert!(seen.insert(*key), "duplicate {key}");
                            }
                        }
                    }
                }
            }
        }
        assert_eq!(seen, (0..2_000).collect());
    }
}
