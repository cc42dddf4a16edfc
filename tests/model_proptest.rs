// Model-based property tests: random operation sequences against
// std::collections::HashMap.
//
// Property 1: after every put/delete, len() and every probed key match the
//             model (with a well-mixed and a deliberately colliding hasher).
// Property 2: a Cursor interleaved with random mutations yields each key
//             present for the whole walk exactly once, never a key deleted
//             before it was reached, and always the value current at the
//             time it is yielded.
use std::collections::HashMap as StdHashMap;
use std::collections::HashSet;
use std::hash::BuildHasher;
use std::hash::Hasher;

use bucket_map::HashMap;
use proptest::prelude::*;

/// Keeps only eight distinct hash values so chains overflow and deletes
/// leave holes behind.
#[derive(Clone, Default)]
struct FewBuckets(u64);

impl Hasher for FewBuckets {
    fn finish(&self) -> u64 {
        self.0.wrapping_mul(0x9E37_79B9_7F4A_7C15) & (7 << 61)
    }

    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 = self.0.rotate_left(8) ^ u64::from(*b);
        }
    }
}

impl BuildHasher for FewBuckets {
    type Hasher = FewBuckets;

    fn build_hasher(&self) -> Self::Hasher {
        FewBuckets(0)
    }
}

#[derive(Debug, Clone)]
enum Op {
    Put(u16, u32),
    Delete(u16),
    Get(u16),
}

fn op(keys: u16) -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..keys, any::<u32>()).prop_map(|(k, v)| Op::Put(k, v)),
        2 => (0..keys).prop_map(Op::Delete),
        1 => (0..keys).prop_map(Op::Get),
    ]
}

fn run_against_model<S: BuildHasher>(
    mut map: HashMap<u16, u32, S>,
    ops: Vec<Op>,
) -> Result<(), TestCaseError> {
    let mut model = StdHashMap::new();
    for op in ops {
        match op {
            Op::Put(k, v) => {
                prop_assert_eq!(map.put(k, v), model.insert(k, v).is_none());
            }
            Op::Delete(k) => {
                prop_assert_eq!(map.delete(&k), model.remove(&k).is_some());
            }
            Op::Get(k) => {
                prop_assert_eq!(map.get(&k), model.get(&k));
                prop_assert_eq!(
                    map.get_with_presence(&k),
                    (model.get(&k).copied().unwrap_or_default(), model.contains_key(&k))
                );
            }
        }
        prop_assert_eq!(map.len(), model.len());
    }

    for (k, v) in &model {
        prop_assert_eq!(map.get(k), Some(v));
    }
    let mut seen = StdHashMap::new();
    for (k, v) in map.iter() {
        prop_assert!(seen.insert(*k, *v).is_none(), "{} yielded twice", k);
    }
    prop_assert_eq!(seen, model);
    Ok(())
}

proptest! {
    #[test]
    fn prop_matches_std_model(ops in proptest::collection::vec(op(512), 1..2_000)) {
        run_against_model(HashMap::new(), ops)?;
    }

    #[test]
    fn prop_matches_std_model_with_collisions(ops in proptest::collection::vec(op(256), 1..1_000)) {
        run_against_model(HashMap::with_hasher(FewBuckets::default()), ops)?;
    }

    #[test]
    fn prop_cursor_under_mutation(
        initial in 0u16..300,
        steps in proptest::collection::vec((op(1_024), 0usize..4), 1..400)
    ) {
        let mut map = HashMap::new();
        for k in 0..initial {
            map.put(k, u32::from(k));
        }

        let mut cursor = map.cursor();
        let mut yielded = HashSet::new();
        let mut touched = HashSet::new();
        let mut exhausted = false;

        for (op, advance) in steps {
            for _ in 0..advance {
                let Some((&k, &v)) = cursor.next(&map) else {
                    exhausted = true;
                    break;
                };
                prop_assert!(yielded.insert(k), "{} yielded twice", k);
                prop_assert_eq!(map.get(&k), Some(&v));
            }
            if exhausted {
                break;
            }

            match op {
                Op::Put(k, v) => {
                    map.put(k, v);
                    touched.insert(k);
                }
                Op::Delete(k) => {
                    if map.delete(&k) && !yielded.contains(&k) {
                        touched.insert(k);
                    }
                }
                Op::Get(_) => {}
            }
        }

        while let Some((&k, &v)) = cursor.next(&map) {
            prop_assert!(yielded.insert(k), "{} yielded twice", k);
            prop_assert_eq!(map.get(&k), Some(&v));
        }
        prop_assert!(cursor.is_exhausted());

        // Keys that were never written after the cursor started are stable
        // and must all have been reported.
        for k in (0..initial).filter(|k| !touched.contains(k)) {
            prop_assert!(yielded.contains(&k), "missed stable key {}", k);
        }
    }
}
