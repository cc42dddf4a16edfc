//! Incremental growth: starting a new bucket array and moving entries out of
//! the previous one, a couple of buckets per insert.

use core::mem;

use crate::bucket::BUCKET_SIZE;
use crate::bucket::Bucket;
use crate::bucket::EVACUATED_X;
use crate::bucket::is_cell_empty;
use crate::error::TryReserveError;
use crate::hash_table::HashTable;
use crate::hash_table::alloc_buckets;
use crate::hash_table::over_load_factor;

/// Write cursor into one half of the new array.
struct EvacDst<'a, K, V> {
    link: &'a mut Bucket<K, V>,
    index: usize,
}

impl<'a, K, V> EvacDst<'a, K, V> {
    fn new(link: &'a mut Bucket<K, V>) -> Self {
        Self { link, index: 0 }
    }

    /// Appends an entry, moving on to a fresh overflow link once the current
    /// one is full.
    fn push(self, tag: u8, key: K, value: V, new_links: &mut usize) -> Self {
        let EvacDst { mut link, mut index } = self;
        if index == BUCKET_SIZE {
            link = link.push_overflow();
            index = 0;
            *new_links += 1;
        }
        link.put_at(index, tag, key, value);

        EvacDst {
            link,
            index: index + 1,
        }
    }
}

#[derive(Default)]
struct Moved {
    x: usize,
    y: usize,
    new_links: usize,
}

/// Moves every entry of the chain rooted at `src` into `x`, or into `y` when
/// `hash & new_bit` is set. `y` is absent for a same-size growth.
///
/// Empty source slots are tagged `EVACUATED_EMPTY`, moved ones
/// `EVACUATED_X`/`EVACUATED_Y`.
fn evacuate_chain<K, V>(
    src: &mut Bucket<K, V>,
    x: &mut Bucket<K, V>,
    y: Option<&mut Bucket<K, V>>,
    new_bit: usize,
    hasher: &impl Fn(&K) -> u64,
) -> Moved {
    let mut halves = [Some(EvacDst::new(x)), y.map(EvacDst::new)];
    let mut moved = Moved::default();

    let mut link = Some(src);
    while let Some(current) = link {
        for index in 0..BUCKET_SIZE {
            let top = current.tag(index);
            if is_cell_empty(top) {
                current.mark_evacuated_empty(index);
                continue;
            }
            let Some((key, _)) = current.entry(index) else {
                continue;
            };

            // The hash is taken before the entry leaves the slot, so a
            // panicking hasher leaves the chain intact.
            let use_y = halves[1].is_some() && hasher(key) as usize & new_bit != 0;
            let half = usize::from(use_y);
            let Some((key, value)) = current.evacuate_slot(index, EVACUATED_X + half as u8) else {
                continue;
            };
            if let Some(dst) = halves[half].take() {
                halves[half] = Some(dst.push(top, key, value, &mut moved.new_links));
            }

            if use_y {
                moved.y += 1;
            } else {
                moved.x += 1;
            }
        }
        link = current.overflow_mut();
    }

    moved
}

impl<K, V> HashTable<K, V> {
    /// Allocates the next bucket array and parks the current one as the
    /// evacuation source.
    ///
    /// The array doubles when the next insert would overload the table.
    /// Otherwise the growth was triggered by overflow links, and the new
    /// array keeps the bucket count so chains are rebuilt without holes.
    pub(crate) fn start_growth(&mut self) -> Result<(), TryReserveError> {
        debug_assert!(!self.is_growing());

        let same_size = !over_load_factor(self.populated + 1, self.b);
        let b = if same_size {
            self.b
        } else {
            self.b
                .checked_add(1)
                .ok_or(TryReserveError::CapacityOverflow)?
        };

        let buckets = alloc_buckets(b)?;
        let old_buckets = mem::replace(&mut self.buckets, buckets);
        log::debug!(
            "starting {} growth: {} -> {} buckets, {} entries, {} overflow links",
            if same_size { "same-size" } else { "doubling" },
            old_buckets.len(),
            self.buckets.len(),
            self.populated,
            self.overflow_buckets,
        );

        self.old_buckets = Some(old_buckets);
        self.b = b;
        self.evacuated = 0;
        self.overflow_buckets = 0;
        self.same_size_grow = same_size;

        Ok(())
    }

    /// Evacuates the old bucket backing `bucket` plus the bucket at the
    /// evacuation mark, if the growth is still running after the first.
    pub(crate) fn grow_work(&mut self, bucket: usize, hasher: &impl Fn(&K) -> u64) {
        let Some(old_len) = self.old_buckets.as_deref().map(<[_]>::len) else {
            return;
        };

        self.evacuate(bucket & (old_len - 1), hasher);
        if self.is_growing() {
            self.evacuate(self.evacuated, hasher);
        }
    }

    fn evacuate(&mut self, old_index: usize, hasher: &impl Fn(&K) -> u64) {
        let same_size = self.same_size_grow;
        let Some(old_buckets) = self.old_buckets.as_deref_mut() else {
            return;
        };
        let old_len = old_buckets.len();
        let src = &mut old_buckets[old_index];

        if !src.is_evacuated() {
            let (x, y) = if same_size {
                (&mut self.buckets[old_index], None)
            } else {
                let (lower, upper) = self.buckets.split_at_mut(old_len);
                (&mut lower[old_index], Some(&mut upper[old_index]))
            };

            let moved = evacuate_chain(src, x, y, old_len, hasher);
            self.overflow_buckets += moved.new_links;
            log::trace!(
                "evacuated old bucket {old_index}: {} to x, {} to y",
                moved.x,
                moved.y
            );
        }

        if old_index == self.evacuated {
            self.advance_evacuation_mark();
        }
    }

    /// Moves the mark past `evacuated` and any buckets already evacuated out
    /// of order, releasing the old array once the mark reaches its end.
    fn advance_evacuation_mark(&mut self) {
        let Some(old_buckets) = self.old_buckets.as_deref() else {
            return;
        };
        let old_len = old_buckets.len();

        self.evacuated += 1;
        while self.evacuated < old_len && old_buckets[self.evacuated].is_evacuated() {
            self.evacuated += 1;
        }

        if self.evacuated == old_len {
            self.old_buckets = None;
            self.same_size_grow = false;
            log::debug!(
                "growth complete: {} buckets, {} entries",
                self.buckets.len(),
                self.populated
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use crate::bucket::EVACUATED_EMPTY;
    use crate::bucket::EVACUATED_Y;

    use super::*;

    fn identity(key: &u64) -> u64 {
        *key
    }

    /// Fills a table with keys `0..count` hashed to themselves and stops
    /// right after the insert that starts a doubling.
    fn table_at_growth_start(capacity: usize) -> (HashTable<u64, u64>, u64) {
        let mut table = HashTable::with_capacity(capacity);
        let mut k = 0;
        while !table.is_growing() {
            table.insert(k, k, k, identity);
            k += 1;
        }
        (table, k)
    }

    #[test_log::test]
    fn entries_split_between_halves() {
        let mut src: Bucket<u64, u64> = Bucket::new();
        let mut x = Bucket::new();
        let mut y = Bucket::new();
        for k in 0..20u64 {
            src.put(0x40, k, k * 3);
        }
        src.delete(0x40, |&k| k == 5);

        let moved = evacuate_chain(&mut src, &mut x, Some(&mut y), 4, &identity);
        assert_eq!(moved.x + moved.y, 19);
        // Twelve keys land in `x`, which needs one overflow link.
        assert_eq!(moved.new_links, 1);
        assert!(src.is_evacuated());

        let keys = |root: &Bucket<u64, u64>| -> Vec<u64> {
            root.chain()
                .flat_map(|link| (0..BUCKET_SIZE).filter_map(move |i| link.entry(i)))
                .map(|(k, _)| *k)
                .collect()
        };
        let in_x = keys(&x);
        let in_y = keys(&y);
        assert!(in_x.iter().all(|k| k & 4 == 0));
        assert!(in_y.iter().all(|k| k & 4 != 0));
        assert_eq!(in_x.len(), moved.x);
        assert_eq!(in_y.len(), moved.y);

        for link in src.chain() {
            for index in 0..BUCKET_SIZE {
                assert!(matches!(
                    link.tag(index),
                    EVACUATED_X | EVACUATED_Y | EVACUATED_EMPTY
                ));
            }
        }
        assert_eq!(src.tag(5), EVACUATED_EMPTY);
        assert_eq!(src.tag(4), EVACUATED_Y);
        assert_eq!(src.tag(3), EVACUATED_X);
    }

    #[test]
    fn destination_spills_into_new_links() {
        let mut src: Bucket<u64, ()> = Bucket::new();
        let mut x = Bucket::new();
        for k in 0..30u64 {
            src.put(0x40, k, ());
        }

        let moved = evacuate_chain(&mut src, &mut x, None, 1, &identity);
        assert_eq!(moved.x, 30);
        assert_eq!(moved.y, 0);
        assert_eq!(moved.new_links, 3);
        assert_eq!(x.chain().count(), 4);
        for k in 0..30u64 {
            assert!(x.get(0x40, |&v| v == k).is_some());
        }
    }

    #[test_log::test]
    fn doubling_keeps_the_old_array_until_drained() {
        let (mut table, mut k) = table_at_growth_start(100);
        let old_len = table.old_buckets.as_deref().unwrap().len();
        assert_eq!(table.bucket_count(), old_len * 2);
        assert!(!table.same_size_grow);

        let mut inserts = 0;
        while table.is_growing() {
            let before = table.evacuated;
            table.insert(k, k, k, identity);
            k += 1;
            inserts += 1;
            assert!(!table.is_growing() || table.evacuated > before);
        }
        assert!(inserts <= old_len);
        assert_eq!(table.evacuated, old_len);
        assert_eq!(table.len(), k as usize);
        for key in 0..k {
            assert_eq!(table.find(key, |v| *v == key), Some((&key, &key)));
        }
    }

    #[test]
    fn out_of_order_evacuations_are_skipped_by_the_mark() {
        let (mut table, k) = table_at_growth_start(100);
        let old_len = table.old_buckets.as_deref().unwrap().len();
        let mark = table.evacuated;
        assert!(mark < old_len);

        for bucket in (mark + 1..old_len).rev() {
            table.evacuate(bucket, &identity);
        }
        assert!(table.is_growing());
        assert_eq!(table.evacuated, mark);
        assert!(
            table.old_buckets.as_deref().unwrap()[mark + 1..]
                .iter()
                .all(Bucket::is_evacuated)
        );

        table.evacuate(mark, &identity);
        assert!(!table.is_growing());
        assert_eq!(table.evacuated, old_len);
        for key in 0..k {
            assert_eq!(table.find(key, |v| *v == key), Some((&key, &key)));
        }
    }

    #[test]
    fn growth_keeps_the_newest_array_for_lookups() {
        let (mut table, k) = table_at_growth_start(0);
        while table.is_growing() {
            let evacuated = table.evacuated;
            table.grow_work(evacuated, &identity);
        }

        let mask = table.bucket_count() - 1;
        for key in 0..k {
            let root = &table.buckets[key as usize & mask];
            assert!(root.get(crate::bucket::top_hash(key), |v| *v == key).is_some());
        }
    }
}
