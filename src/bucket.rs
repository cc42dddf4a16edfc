use alloc::boxed::Box;
use core::mem::MaybeUninit;

/// Number of slots in one bucket link.
pub(crate) const BUCKET_SIZE: usize = 8;

/// This slot and every later slot in the same link have never been written.
pub(crate) const EMPTY_REST: u8 = 0;
/// The slot held an entry that was deleted.
pub(crate) const EMPTY_CELL: u8 = 1;
/// The entry was evacuated to the lower half of the grown array.
pub(crate) const EVACUATED_X: u8 = 2;
/// The entry was evacuated to the upper half of the grown array.
pub(crate) const EVACUATED_Y: u8 = 3;
/// The slot was empty when its bucket got evacuated.
pub(crate) const EVACUATED_EMPTY: u8 = 4;
/// Smallest tag of an occupied slot.
pub(crate) const MIN_TOP_HASH: u8 = 5;

// Evacuation picks its half by adding 0 or 1 to EVACUATED_X.
const _: () = assert!(EVACUATED_X + 1 == EVACUATED_Y && EVACUATED_X ^ 1 == EVACUATED_Y);

/// Derives the slot tag from the top byte of `hash`, shifted out of the
/// sentinel range.
#[inline(always)]
pub(crate) fn top_hash(hash: u64) -> u8 {
    let top = (hash >> 56) as u8;
    if top < MIN_TOP_HASH {
        top + MIN_TOP_HASH
    } else {
        top
    }
}

#[inline(always)]
pub(crate) fn is_cell_empty(tag: u8) -> bool {
    tag <= EMPTY_CELL
}

#[inline(always)]
pub(crate) fn is_occupied(tag: u8) -> bool {
    tag >= MIN_TOP_HASH
}

/// Result of [`Bucket::put`].
pub(crate) enum PutOutcome<V> {
    /// The key was already present; its previous value is returned.
    Replaced(V),
    /// A fresh slot was filled. `new_link` is set when an overflow link had to
    /// be appended to hold it.
    Inserted { new_link: bool },
}

/// One link of a bucket chain: eight `(tag, key, value)` slots plus an owned
/// overflow link.
///
/// A key and value are initialized exactly when the tag at the same index is
/// an occupied tag (`>= MIN_TOP_HASH`). Every write and clear of a slot keeps
/// the three arrays in step.
pub(crate) struct Bucket<K, V> {
    tags: [u8; BUCKET_SIZE],
    keys: [MaybeUninit<K>; BUCKET_SIZE],
    values: [MaybeUninit<V>; BUCKET_SIZE],
    overflow: Option<Box<Bucket<K, V>>>,
}

impl<K, V> Bucket<K, V> {
    pub(crate) const fn new() -> Self {
        Self {
            tags: [EMPTY_REST; BUCKET_SIZE],
            keys: [const { MaybeUninit::uninit() }; BUCKET_SIZE],
            values: [const { MaybeUninit::uninit() }; BUCKET_SIZE],
            overflow: None,
        }
    }

    #[inline(always)]
    pub(crate) fn tag(&self, index: usize) -> u8 {
        self.tags[index]
    }

    #[inline]
    pub(crate) fn overflow(&self) -> Option<&Bucket<K, V>> {
        self.overflow.as_deref()
    }

    #[inline]
    pub(crate) fn overflow_mut(&mut self) -> Option<&mut Bucket<K, V>> {
        self.overflow.as_deref_mut()
    }

    /// Iterates over this link followed by every overflow link.
    pub(crate) fn chain(&self) -> impl Iterator<Item = &Bucket<K, V>> {
        core::iter::successors(Some(self), |link| link.overflow())
    }

    /// A link whose first slot carries an evacuation sentinel has been fully
    /// migrated and no longer holds live entries.
    #[inline]
    pub(crate) fn is_evacuated(&self) -> bool {
        let top = self.tags[0];
        top > EMPTY_CELL && top < MIN_TOP_HASH
    }

    /// Returns the entry stored at `index` if the slot is occupied.
    #[inline]
    pub(crate) fn entry(&self, index: usize) -> Option<(&K, &V)> {
        if !is_occupied(self.tags[index]) {
            return None;
        }

        // SAFETY: An occupied tag is only ever written together with the key and
        // value at the same index, so both are initialized.
        unsafe {
            Some((
                self.keys[index].assume_init_ref(),
                self.values[index].assume_init_ref(),
            ))
        }
    }

    fn link_mut(&mut self, depth: usize) -> Option<&mut Bucket<K, V>> {
        let mut link = self;
        for _ in 0..depth {
            link = link.overflow.as_deref_mut()?;
        }
        Some(link)
    }

    /// Locates the `(link depth, slot)` holding a key with `tag` for which
    /// `eq` holds.
    ///
    /// An `EMPTY_REST` tag ends the scan of its own link only; overflow links
    /// are still visited.
    fn find_slot(&self, tag: u8, eq: impl Fn(&K) -> bool) -> Option<(usize, usize)> {
        debug_assert!(is_occupied(tag));

        for (depth, link) in self.chain().enumerate() {
            for index in 0..BUCKET_SIZE {
                let top = link.tags[index];
                if top != tag {
                    if top == EMPTY_REST {
                        break;
                    }
                    continue;
                }

                // SAFETY: `tag` is an occupied tag and matched, so the key at
                // `index` is initialized.
                if eq(unsafe { link.keys[index].assume_init_ref() }) {
                    return Some((depth, index));
                }
            }
        }

        None
    }

    pub(crate) fn get(&self, tag: u8, eq: impl Fn(&K) -> bool) -> Option<(&K, &V)> {
        let (depth, index) = self.find_slot(tag, eq)?;
        self.chain().nth(depth)?.entry(index)
    }

    pub(crate) fn get_mut(&mut self, tag: u8, eq: impl Fn(&K) -> bool) -> Option<(&K, &mut V)> {
        let (depth, index) = self.find_slot(tag, eq)?;
        let link = self.link_mut(depth)?;

        // SAFETY: `find_slot` only reports occupied slots.
        unsafe {
            Some((
                link.keys[index].assume_init_ref(),
                link.values[index].assume_init_mut(),
            ))
        }
    }

    /// Inserts or overwrites `key` in this chain.
    ///
    /// The first reusable slot is remembered while the rest of the chain is
    /// searched for an equal key. Without either, a new overflow link is
    /// appended to the last link.
    pub(crate) fn put(&mut self, tag: u8, key: K, value: V) -> PutOutcome<V>
    where
        K: Eq,
    {
        debug_assert!(is_occupied(tag));

        let mut vacant = None;
        let mut found = None;
        let mut last = 0;
        'chain: for (depth, link) in self.chain().enumerate() {
            last = depth;
            for index in 0..BUCKET_SIZE {
                let top = link.tags[index];
                if top != tag {
                    if vacant.is_none() && is_cell_empty(top) {
                        vacant = Some((depth, index));
                    }
                    if top == EMPTY_REST {
                        break;
                    }
                    continue;
                }

                // SAFETY: `tag` is an occupied tag and matched, so the key at
                // `index` is initialized.
                if unsafe { link.keys[index].assume_init_ref() } == &key {
                    found = Some((depth, index));
                    break 'chain;
                }
            }
        }

        if let Some((depth, index)) = found {
            let Some(link) = self.link_mut(depth) else {
                unreachable!("matched slot outside of its chain");
            };
            // SAFETY: `found` points at an occupied slot.
            let slot = unsafe { link.values[index].assume_init_mut() };
            return PutOutcome::Replaced(core::mem::replace(slot, value));
        }

        let (link, index, new_link) = match vacant {
            Some((depth, index)) => match self.link_mut(depth) {
                Some(link) => (link, index, false),
                None => unreachable!("vacant slot outside of its chain"),
            },
            None => match self.link_mut(last) {
                Some(link) => (link.push_overflow(), 0, true),
                None => unreachable!("chain shorter than its scan"),
            },
        };
        link.put_at(index, tag, key, value);

        PutOutcome::Inserted { new_link }
    }

    /// Removes the entry matching `tag` and `eq`, leaving an `EMPTY_CELL`
    /// behind so later slots stay reachable.
    pub(crate) fn delete(&mut self, tag: u8, eq: impl Fn(&K) -> bool) -> Option<(K, V)> {
        let (depth, index) = self.find_slot(tag, eq)?;
        let link = self.link_mut(depth)?;
        link.tags[index] = EMPTY_CELL;

        // SAFETY: The slot was occupied. Its tag now marks it empty, so this is
        // the only read of the key and value.
        unsafe {
            Some((
                link.keys[index].assume_init_read(),
                link.values[index].assume_init_read(),
            ))
        }
    }

    /// Writes an entry into a slot known to be free.
    #[inline]
    pub(crate) fn put_at(&mut self, index: usize, tag: u8, key: K, value: V) {
        debug_assert!(!is_occupied(self.tags[index]));
        debug_assert!(is_occupied(tag));

        self.keys[index].write(key);
        self.values[index].write(value);
        self.tags[index] = tag;
    }

    /// Appends a fresh overflow link and returns it.
    pub(crate) fn push_overflow(&mut self) -> &mut Bucket<K, V> {
        debug_assert!(self.overflow.is_none());
        self.overflow.insert(Box::new(Bucket::new()))
    }

    /// Moves the entry at `index` out, retagging the slot with `mark`.
    pub(crate) fn evacuate_slot(&mut self, index: usize, mark: u8) -> Option<(K, V)> {
        debug_assert!(mark == EVACUATED_X || mark == EVACUATED_Y);
        if !is_occupied(self.tags[index]) {
            return None;
        }
        self.tags[index] = mark;

        // SAFETY: The slot was occupied and has just been retagged as evacuated,
        // so the key and value are read out exactly once.
        unsafe {
            Some((
                self.keys[index].assume_init_read(),
                self.values[index].assume_init_read(),
            ))
        }
    }

    #[inline]
    pub(crate) fn mark_evacuated_empty(&mut self, index: usize) {
        debug_assert!(is_cell_empty(self.tags[index]));
        self.tags[index] = EVACUATED_EMPTY;
    }

    fn drop_entries(&mut self) {
        if !core::mem::needs_drop::<K>() && !core::mem::needs_drop::<V>() {
            return;
        }

        for index in 0..BUCKET_SIZE {
            if is_occupied(self.tags[index]) {
                self.tags[index] = EMPTY_CELL;
                // SAFETY: Occupied slots hold initialized entries. The tag was
                // cleared first so nothing reads them again.
                unsafe {
                    self.keys[index].assume_init_drop();
                    self.values[index].assume_init_drop();
                }
            }
        }
    }
}

impl<K, V> Drop for Bucket<K, V> {
    fn drop(&mut self) {
        self.drop_entries();

        // Unlink iteratively so long chains cannot exhaust the stack.
        let mut next = self.overflow.take();
        while let Some(mut link) = next {
            next = link.overflow.take();
        }
    }
}

impl<K, V> Clone for Bucket<K, V>
where
    K: Clone,
    V: Clone,
{
    fn clone(&self) -> Self {
        fn clone_link<K: Clone, V: Clone>(src: &Bucket<K, V>) -> Bucket<K, V> {
            let mut dst = Bucket::new();
            dst.tags = src.tags;
            for index in 0..BUCKET_SIZE {
                if let Some((key, value)) = src.entry(index) {
                    dst.keys[index].write(key.clone());
                    dst.values[index].write(value.clone());
                }
            }
            dst
        }

        let mut root = clone_link(self);
        let mut tail = &mut root;
        for src in self.chain().skip(1) {
            tail = &mut **tail.overflow.insert(Box::new(clone_link(src)));
        }
        root
    }
}
