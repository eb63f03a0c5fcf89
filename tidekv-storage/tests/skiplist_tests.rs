//! # Skip List and MemTable Tests
//!
//! This test suite verifies:
//! - Ordering after arbitrary put/delete sequences (property based)
//! - Point consistency against a reference map
//! - Concurrent writers on disjoint ranges with concurrent readers
//! - Concurrent overwrites of the same keys
//! - Freeze-and-replace under concurrent writers

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use bytes::Bytes;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tidekv_core::{Metrics, RandomSource};
use tidekv_storage::memtable::{MemTableConfig, MemTableManager, SkipList};

/// Generate test key with specified pattern
fn test_key(prefix: &str, num: u64) -> Bytes {
    Bytes::from(format!("{}_key_{:08}", prefix, num))
}

fn test_value(num: u64) -> Bytes {
    Bytes::from(format!("value_{}", num))
}

#[derive(Debug, Clone)]
enum Op {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let key = prop::collection::vec(any::<u8>(), 0..6);
    let value = prop::collection::vec(any::<u8>(), 0..8);
    prop_oneof![
        3 => (key.clone(), value).prop_map(|(k, v)| Op::Put(k, v)),
        1 => key.prop_map(Op::Delete),
    ]
}

proptest! {
    #[test]
    fn prop_iteration_is_strictly_increasing(ops in prop::collection::vec(op_strategy(), 0..200), seed in any::<u64>()) {
        let list = SkipList::new(RandomSource::from_seed(seed));
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Put(k, v) => {
                    list.put(Bytes::from(k.clone()), Bytes::from(v.clone()));
                    model.insert(k, v);
                }
                Op::Delete(k) => {
                    let removed = list.delete(&k);
                    prop_assert_eq!(removed, model.remove(&k).is_some());
                }
            }
        }

        let keys: Vec<Bytes> = list.iter().map(|(k, _)| k).collect();
        prop_assert!(keys.windows(2).all(|w| w[0] < w[1]));

        let items: Vec<(Vec<u8>, Vec<u8>)> = list.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
        let expected: Vec<(Vec<u8>, Vec<u8>)> = model.into_iter().collect();
        prop_assert_eq!(items, expected);
    }
}

#[test]
fn test_point_consistency_against_model() {
    let mut rng = StdRng::seed_from_u64(42);
    let list = SkipList::new(RandomSource::from_seed(42));
    let mut model: BTreeMap<u64, u64> = BTreeMap::new();

    for step in 0..20_000u64 {
        let k = rng.gen_range(0..2_000u64);
        match rng.gen_range(0..10) {
            0..=6 => {
                list.put(test_key("p", k), test_value(step));
                model.insert(k, step);
            }
            7 => {
                list.delete(&test_key("p", k));
                model.remove(&k);
            }
            _ => {
                let expected = model.get(&k).map(|&v| test_value(v));
                assert_eq!(list.get(&test_key("p", k)), expected, "key {} at step {}", k, step);
            }
        }
    }

    assert_eq!(list.len(), model.len());
    let expected_size: usize = model
        .iter()
        .map(|(&k, &v)| test_key("p", k).len() + test_value(v).len())
        .sum();
    assert_eq!(list.binary_size(), expected_size);
}

#[test]
fn test_overwrite_adjusts_size_by_delta() {
    let list = SkipList::new(RandomSource::from_seed(1));
    list.put(Bytes::from("key"), Bytes::from("short"));
    assert_eq!(list.binary_size(), 8);
    list.put(Bytes::from("key"), Bytes::from("a much longer value"));
    assert_eq!(list.binary_size(), 3 + 19);
    list.put(Bytes::from("key"), Bytes::new());
    assert_eq!(list.binary_size(), 3);
    assert_eq!(list.len(), 1);
}

#[test]
fn test_concurrent_writers_and_readers() {
    const WRITERS: u64 = 4;
    const READERS: usize = 4;
    const PER_WRITER: u64 = 5_000;

    let list = Arc::new(SkipList::new(RandomSource::from_seed(7)));
    let done = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(WRITERS as usize + READERS));

    let mut writers = Vec::new();
    for w in 0..WRITERS {
        let list = Arc::clone(&list);
        let barrier = Arc::clone(&barrier);
        writers.push(thread::spawn(move || {
            barrier.wait();
            for i in 0..PER_WRITER {
                let n = w * PER_WRITER + i;
                list.put(test_key("w", n), test_value(n));
            }
        }));
    }

    let mut readers = Vec::new();
    for r in 0..READERS {
        let list = Arc::clone(&list);
        let done = Arc::clone(&done);
        let barrier = Arc::clone(&barrier);
        readers.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(r as u64);
            barrier.wait();
            let mut hits = 0u64;
            while !done.load(Ordering::Acquire) {
                let n = rng.gen_range(0..WRITERS * PER_WRITER);
                if let Some(v) = list.get(&test_key("w", n)) {
                    assert_eq!(v, test_value(n));
                    hits += 1;
                }
                // Never inserted
                assert_eq!(list.get(&test_key("absent", n)), None);
            }
            hits
        }));
    }

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(list.len() as u64, WRITERS * PER_WRITER);
    for n in 0..WRITERS * PER_WRITER {
        assert_eq!(list.get(&test_key("w", n)), Some(test_value(n)));
    }
    let keys: Vec<Bytes> = list.iter().map(|(k, _)| k).collect();
    assert_eq!(keys.len() as u64, WRITERS * PER_WRITER);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_concurrent_inserts_of_same_keys() {
    let list = Arc::new(SkipList::new(RandomSource::from_seed(9)));
    let handles: Vec<_> = (0..8u64)
        .map(|t| {
            let list = Arc::clone(&list);
            thread::spawn(move || {
                for n in 0..1_000u64 {
                    list.put(test_key("s", n), test_value(t));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // One node per key no matter how the races went
    assert_eq!(list.len(), 1_000);
    assert_eq!(list.iter().count(), 1_000);
    for n in 0..1_000u64 {
        let v = list.get(&test_key("s", n)).unwrap();
        assert!((0..8).any(|t| v == test_value(t)));
    }
}

#[test]
fn test_delete_concurrent_with_puts() {
    let list = Arc::new(SkipList::new(RandomSource::from_seed(11)));
    for n in 0..2_000u64 {
        list.put(test_key("d", n), test_value(n));
    }

    let deleter = {
        let list = Arc::clone(&list);
        thread::spawn(move || {
            for n in (0..2_000u64).step_by(2) {
                assert!(list.delete(&test_key("d", n)));
            }
        })
    };
    let writer = {
        let list = Arc::clone(&list);
        thread::spawn(move || {
            for n in 2_000..4_000u64 {
                list.put(test_key("d", n), test_value(n));
            }
        })
    };
    deleter.join().unwrap();
    writer.join().unwrap();

    assert_eq!(list.len(), 1_000 + 2_000);
    for n in 0..4_000u64 {
        let expected = if n < 2_000 && n % 2 == 0 {
            None
        } else {
            Some(test_value(n))
        };
        assert_eq!(list.get(&test_key("d", n)), expected);
    }
}

#[test]
fn test_manager_freezes_exactly_once_under_contention() {
    let metrics = Metrics::new();
    // Each writer's entries alone exceed the threshold
    let manager = Arc::new(MemTableManager::new(
        MemTableConfig { max_bytes: 64 * 1024 },
        RandomSource::from_seed(5),
        metrics.clone(),
    ));

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                let mut froze = 0;
                for n in 0..2_000u64 {
                    let key = test_key(&format!("t{}", t), n);
                    if manager.put(&key, &[0u8; 32]).unwrap() {
                        froze += 1;
                    }
                }
                froze
            })
        })
        .collect();
    let freezes: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(freezes, metrics.snapshot().memtable_freezes);
    assert_eq!(freezes as usize, manager.pending());
    let stats = manager.stats();
    // No table was frozen while still far below the threshold
    for frozen in &stats.frozen {
        assert!(frozen.size_bytes > 64 * 1024);
    }
    let total: usize = stats.frozen.iter().map(|s| s.entry_count).sum::<usize>()
        + stats.active.entry_count;
    assert_eq!(total, 4 * 2_000);
}
