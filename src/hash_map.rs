use core::borrow::Borrow;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;

use crate::DefaultHashBuilder;
use crate::error::TryReserveError;
use crate::hash_table::HashTable;
use crate::iter::Cursor;
pub use crate::iter::Iter;
pub use crate::iter::Keys;
pub use crate::iter::Values;
use crate::iter::RawIter;

/// A hash map built on the chained-bucket [`HashTable`].
///
/// `HashMap<K, V, S>` stores key-value pairs where keys implement `Hash + Eq`
/// and uses a configurable hasher builder `S` to hash keys. Entries live in
/// buckets of eight slots with overflow chains; growth happens incrementally,
/// a couple of buckets per insert, so no single insert pays for rehashing
/// the whole map.
///
/// Iteration order is randomized: every call to [`iter`](Self::iter),
/// [`range`](Self::range) or [`cursor`](Self::cursor) starts at a different
/// position, drawn from the hasher builder.
///
/// # Performance Characteristics
///
/// - **Memory**: 1 tag byte per slot plus the size of `K` and `V`; slots are
///   allocated eight at a time, with one pointer per bucket for its overflow
///   chain.
/// - **Growth**: amortized over the inserts that follow the one that triggers
///   it; removals never shrink the table.
pub struct HashMap<K, V, S = DefaultHashBuilder> {
    table: HashTable<K, V>,
    hash_builder: S,
    /// Counter mixed into the draw that picks an iteration start.
    iter_seq: AtomicUsize,
}

impl<K, V, S> Debug for HashMap<K, V, S>
where
    K: Debug + Hash + Eq,
    V: Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> Clone for HashMap<K, V, S>
where
    K: Clone,
    V: Clone,
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            hash_builder: self.hash_builder.clone(),
            iter_seq: AtomicUsize::new(self.iter_seq.load(Ordering::Relaxed)),
        }
    }
}

impl<K, V, S> HashMap<K, V, S> {
    /// Creates a new hash map with the given hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use bucket_map::HashMap;
    /// #
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let map: HashMap<i32, String, _> = HashMap::with_hasher(SimpleHasher);
    /// assert!(map.is_empty());
    /// ```
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates a new hash map able to hold `capacity` entries before it
    /// starts growing, using the given hasher builder.
    ///
    /// # Panics
    ///
    /// Panics if the bucket array size overflows `usize`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use bucket_map::HashMap;
    /// #
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let map: HashMap<i32, String, _> = HashMap::with_capacity_and_hasher(100, SimpleHasher);
    /// assert!(map.capacity() >= 100);
    /// ```
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self::from_parts(HashTable::with_capacity(capacity), hash_builder)
    }

    /// Fallible version of [`with_capacity_and_hasher`](Self::with_capacity_and_hasher).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use bucket_map::HashMap;
    /// use bucket_map::DefaultHashBuilder;
    /// use bucket_map::TryReserveError;
    ///
    /// let result = HashMap::<u64, u64>::try_with_capacity_and_hasher(
    ///     usize::MAX,
    ///     DefaultHashBuilder::default(),
    /// );
    /// assert_eq!(result.err(), Some(TryReserveError::CapacityOverflow));
    /// ```
    pub fn try_with_capacity_and_hasher(
        capacity: usize,
        hash_builder: S,
    ) -> Result<Self, TryReserveError> {
        Ok(Self::from_parts(
            HashTable::try_with_capacity(capacity)?,
            hash_builder,
        ))
    }

    fn from_parts(table: HashTable<K, V>, hash_builder: S) -> Self {
        Self {
            table,
            hash_builder,
            iter_seq: AtomicUsize::new(0),
        }
    }

    /// Returns the number of elements in the map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bucket_map::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// assert_eq!(map.len(), 0);
    /// map.insert(1, "a");
    /// assert_eq!(map.len(), 1);
    /// ```
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the map contains no elements.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of elements the map can hold before its next
    /// growth starts.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Removes all elements, keeping the allocated buckets.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bucket_map::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// map.insert(1, "a");
    /// map.clear();
    /// assert!(map.is_empty());
    /// ```
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Returns a reference to the map's hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    pub(crate) fn table(&self) -> &HashTable<K, V> {
        &self.table
    }

    /// Returns statistics about the underlying table.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> crate::hash_table::DebugStats {
        self.table.debug_stats()
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    pub(crate) fn hash_key<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        self.hash_builder.hash_one(key)
    }

    fn iter_seed(&self) -> u64 {
        self.hash_builder
            .hash_one(self.iter_seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Inserts a key-value pair into the map.
    ///
    /// If the map did not have this key present, `None` is returned. If it
    /// did, the value is updated and the old value returned; the stored key
    /// is left unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bucket_map::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// assert_eq!(map.insert(37, "a"), None);
    /// assert_eq!(map.insert(37, "b"), Some("a"));
    /// assert_eq!(map.get(&37), Some(&"b"));
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.try_insert(key, value) {
            Ok(previous) => previous,
            Err(err) => err.handle(),
        }
    }

    /// Fallible version of [`insert`](Self::insert), reporting a failure to
    /// allocate the next bucket array instead of aborting.
    ///
    /// On error the map is unchanged and `key` and `value` are dropped.
    pub fn try_insert(&mut self, key: K, value: V) -> Result<Option<V>, TryReserveError> {
        let hash = self.hash_key(&key);
        let hash_builder = &self.hash_builder;
        self.table
            .try_insert(hash, key, value, |k| hash_builder.hash_one(k))
    }

    /// Inserts a key-value pair, returning `true` if the key was not present
    /// before.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bucket_map::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// assert!(map.put("k", 1));
    /// assert!(!map.put("k", 2));
    /// assert_eq!(map.get("k"), Some(&2));
    /// ```
    pub fn put(&mut self, key: K, value: V) -> bool {
        self.insert(key, value).is_none()
    }

    /// Returns a reference to the value corresponding to the key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bucket_map::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.get(&1), Some(&"a"));
    /// assert_eq!(map.get(&2), None);
    /// ```
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_key_value(key).map(|(_, v)| v)
    }

    /// Returns the stored key and its value.
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.find(self.hash_key(key), |k| k.borrow() == key)
    }

    /// Returns a mutable reference to the value corresponding to the key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bucket_map::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// map.insert(1, 10);
    /// if let Some(v) = map.get_mut(&1) {
    ///     *v += 5;
    /// }
    /// assert_eq!(map.get(&1), Some(&15));
    /// ```
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_key(key);
        self.table
            .find_mut(hash, |k| k.borrow() == key)
            .map(|(_, v)| v)
    }

    /// Returns the value for `key` together with whether it was present.
    ///
    /// An absent key yields `V::default()` and `false`, so a stored default
    /// value can be told apart from a missing one.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bucket_map::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// map.insert("zero", 0);
    /// assert_eq!(map.get_with_presence("zero"), (0, true));
    /// assert_eq!(map.get_with_presence("one"), (0, false));
    /// ```
    pub fn get_with_presence<Q>(&self, key: &Q) -> (V, bool)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone + Default,
    {
        match self.get(key) {
            Some(value) => (value.clone(), true),
            None => (V::default(), false),
        }
    }

    /// Returns `true` if the map contains the key.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_key_value(key).is_some()
    }

    /// Removes a key, returning its value if it was present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bucket_map::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.remove(&1), Some("a"));
    /// assert_eq!(map.remove(&1), None);
    /// ```
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_entry(key).map(|(_, v)| v)
    }

    /// Removes a key, returning the stored key and value if it was present.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_key(key);
        self.table.remove(hash, |k| k.borrow() == key)
    }

    /// Removes a key, returning `true` if it was present.
    pub fn delete<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_entry(key).is_some()
    }

    /// Calls `f` on every entry until it returns `false`.
    ///
    /// The order is randomized like [`iter`](Self::iter).
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bucket_map::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// for k in 0..100 {
    ///     map.insert(k, ());
    /// }
    ///
    /// let mut visited = 0;
    /// map.range(|_, _| {
    ///     visited += 1;
    ///     visited < 10
    /// });
    /// assert_eq!(visited, 10);
    /// ```
    pub fn range(&self, mut f: impl FnMut(&K, &V) -> bool) {
        for (key, value) in self.iter() {
            if !f(key, value) {
                break;
            }
        }
    }

    /// Returns an iterator over the key-value pairs of the map.
    ///
    /// Each entry is visited exactly once, in an order that changes from one
    /// call to the next.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bucket_map::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// map.insert(1, "a");
    /// map.insert(2, "b");
    ///
    /// let mut entries: Vec<_> = map.iter().collect();
    /// entries.sort();
    /// assert_eq!(entries, [(&1, &"a"), (&2, &"b")]);
    /// ```
    pub fn iter(&self) -> Iter<'_, K, V, S> {
        Iter::new(RawIter::new(&self.table, self.iter_seed()), &self.hash_builder)
    }

    /// Returns an iterator over the keys of the map.
    pub fn keys(&self) -> Keys<'_, K, V, S> {
        Keys::new(self.iter())
    }

    /// Returns an iterator over the values of the map.
    pub fn values(&self) -> Values<'_, K, V, S> {
        Values::new(self.iter())
    }

    /// Returns a [`Cursor`] over the map that stays valid while the map is
    /// modified.
    pub fn cursor(&self) -> Cursor<K> {
        Cursor::new(&self.table, self.iter_seed())
    }
}

#[cfg(any(feature = "foldhash", feature = "std"))]
impl<K, V> HashMap<K, V, DefaultHashBuilder> {
    /// Creates an empty map using the default hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bucket_map::HashMap;
    /// #
    /// let map: HashMap<i32, String> = HashMap::new();
    /// assert!(map.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }

    /// Creates an empty map able to hold `capacity` entries before growing,
    /// using the default hasher builder.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }
}

#[cfg(feature = "foldhash")]
impl<K, V> HashMap<K, V, foldhash::fast::FixedState> {
    /// Creates an empty map whose hashes, and therefore iteration orders,
    /// are fully determined by `seed`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bucket_map::HashMap;
    /// #
    /// let mut a = HashMap::with_seed(7);
    /// let mut b = HashMap::with_seed(7);
    /// for k in 0..50 {
    ///     a.insert(k, ());
    ///     b.insert(k, ());
    /// }
    /// assert!(a.keys().eq(b.keys()));
    /// ```
    pub fn with_seed(seed: u64) -> Self {
        Self::with_hasher(foldhash::fast::FixedState::with_seed(seed))
    }
}

impl<K, V, S> Default for HashMap<K, V, S>
where
    S: Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<'a, K, V, S> IntoIterator for &'a HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
