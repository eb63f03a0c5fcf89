//! # Manifest and Compaction Tests
//!
//! This test suite verifies:
//! - Snapshot isolation between manifest versions
//! - Compaction of two 40,000-key tables keeps every value
//! - Newest table wins on duplicate keys, before and after compaction
//! - Persistence of the level set across save/load
//! - Old snapshots stay readable after their tables are superseded

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use tidekv_core::RandomSource;
use tidekv_storage::manifest::{Manifest, ManifestOptions};
use tidekv_storage::sstable::{sstable_path, SSTable, SSTableOptions};

/// Big-endian so byte order matches numeric order
fn int_key(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

fn int_value(n: u64) -> Vec<u8> {
    format!("value_{}", n).into_bytes()
}

fn options(dir: &Path, level_max_bytes: Vec<u64>) -> ManifestOptions {
    ManifestOptions {
        dir: dir.to_path_buf(),
        level_max_bytes,
        table: SSTableOptions {
            block_max_bytes: 4096,
            bloom_false_positive_rate: 0.01,
            rng: RandomSource::from_seed(99),
        },
    }
}

fn int_table(dir: &Path, id: u64, keys: std::ops::Range<u64>) -> Arc<SSTable> {
    let entries: Vec<([u8; 8], Vec<u8>)> = keys.map(|n| (int_key(n), int_value(n))).collect();
    let opts = options(dir, vec![]).table;
    Arc::new(SSTable::create(dir, id, &entries, &opts).unwrap())
}

fn str_table(dir: &Path, id: u64, entries: &[(&str, &str)]) -> Arc<SSTable> {
    let opts = options(dir, vec![]).table;
    Arc::new(SSTable::create(dir, id, entries, &opts).unwrap())
}

fn assert_all_ints(manifest: &Manifest, keys: std::ops::Range<u64>) {
    for n in keys {
        assert_eq!(
            manifest.get_ref(&int_key(n)),
            Some(&int_value(n)[..]),
            "key {}",
            n
        );
    }
}

#[test]
fn test_compaction_keeps_all_80000_keys() {
    let dir = TempDir::new().unwrap();
    // A small level 0 budget so two tables trigger a merge into level 1
    let mut manifest = Manifest::new(options(dir.path(), vec![64 * 1024, 1 << 30]))
        .insert_and_update(int_table(dir.path(), 1, 0..40_000))
        .insert_and_update(int_table(dir.path(), 2, 40_000..80_000));

    assert_eq!(manifest.level(0).unwrap().ids(), vec![1, 2]);
    assert_all_ints(&manifest, 0..80_000);
    assert!(manifest.can_do_compaction());

    let outcome = manifest.size_tiered_compaction(3).unwrap();
    assert_eq!(outcome.created, vec![3]);
    assert_eq!(outcome.levels, vec![0]);
    assert_eq!(outcome.superseded.len(), 2);

    assert!(manifest.level(0).unwrap().is_empty());
    assert_eq!(manifest.level(1).unwrap().ids(), vec![3]);
    assert_eq!(manifest.max_sst_id(), 3);
    assert_all_ints(&manifest, 0..80_000);
    assert_eq!(manifest.get(&int_key(80_000)), None);

    let merged = &manifest.level(1).unwrap().tables()[0];
    assert_eq!(merged.entry_count(), 80_000);
    assert_eq!(merged.first_key(), &int_key(0)[..]);
    assert_eq!(merged.last_key(), &int_key(79_999)[..]);
}

#[test]
fn test_snapshot_isolation() {
    let dir = TempDir::new().unwrap();
    let v1 = Arc::new(
        Manifest::new(options(dir.path(), vec![1 << 30]))
            .insert_and_update(str_table(dir.path(), 1, &[("a", "1"), ("b", "1")])),
    );

    let mut rng = StdRng::seed_from_u64(3);
    let lookups: Vec<String> = (0..200)
        .map(|_| ((b'a' + rng.gen_range(0..26u8)) as char).to_string())
        .collect();
    let before: Vec<Option<Bytes>> = lookups.iter().map(|k| v1.get(k.as_bytes())).collect();

    let v2 = v1.insert_and_update(str_table(dir.path(), 2, &[("b", "2"), ("c", "2")]));

    let after: Vec<Option<Bytes>> = lookups.iter().map(|k| v1.get(k.as_bytes())).collect();
    assert_eq!(before, after);
    assert_eq!(v1.version(), 2);
    assert_eq!(v2.version(), 3);
    assert_eq!(v2.get(b"b"), Some(Bytes::from("2")));
    assert_eq!(v2.get(b"c"), Some(Bytes::from("2")));
    assert_eq!(v1.get(b"c"), None);
}

#[test]
fn test_old_snapshot_survives_compaction_on_other_thread() {
    let dir = TempDir::new().unwrap();
    let old = Arc::new(
        Manifest::new(options(dir.path(), vec![1, 1 << 30]))
            .insert_and_update(int_table(dir.path(), 1, 0..5_000))
            .insert_and_update(int_table(dir.path(), 2, 2_500..7_500)),
    );

    let compactor = {
        let old = Arc::clone(&old);
        thread::spawn(move || {
            let mut next = (*old).clone();
            let outcome = next.size_tiered_compaction(next.max_sst_id() + 1).unwrap();
            for table in &outcome.superseded {
                table.mark_obsolete();
            }
            next
        })
    };
    // Reads on the old version while the merge runs
    assert_all_ints(&old, 0..7_500);
    let next = compactor.join().unwrap();

    // Superseded files stay on disk while this version holds them
    assert!(sstable_path(dir.path(), 1).exists());
    assert_all_ints(&old, 0..7_500);
    assert_all_ints(&next, 0..7_500);
    assert_eq!(next.level(1).unwrap().ids(), vec![3]);

    drop(old);
    assert!(!sstable_path(dir.path(), 1).exists());
    assert!(!sstable_path(dir.path(), 2).exists());
    assert_all_ints(&next, 0..7_500);
}

#[test]
fn test_newest_table_wins_through_compaction() {
    let dir = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(17);
    let mut model: BTreeMap<String, String> = BTreeMap::new();
    let mut manifest = Manifest::new(options(dir.path(), vec![1 << 30]));

    for id in 1..=5u64 {
        let mut batch: BTreeMap<String, String> = BTreeMap::new();
        for _ in 0..300 {
            let key = format!("key_{:04}", rng.gen_range(0..500));
            batch.insert(key, format!("table_{}", id));
        }
        let entries: Vec<(&str, &str)> =
            batch.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        manifest = manifest.insert_and_update(str_table(dir.path(), id, &entries));
        model.extend(batch);
    }

    let check = |m: &Manifest| {
        for (key, value) in &model {
            assert_eq!(m.get(key.as_bytes()), Some(Bytes::from(value.clone())), "{}", key);
        }
    };
    check(&manifest);

    let (merged, superseded) = manifest.compact_level(0, 6).unwrap();
    assert_eq!(superseded.len(), 5);
    assert_eq!(merged.entry_count() as usize, model.len());
    check(&manifest);

    let scanned: Vec<(String, String)> = manifest
        .iter()
        .map(|(k, v)| {
            (
                String::from_utf8(k.to_vec()).unwrap(),
                String::from_utf8(v.to_vec()).unwrap(),
            )
        })
        .collect();
    let expected: Vec<(String, String)> = model.into_iter().collect();
    assert_eq!(scanned, expected);
}

#[test]
fn test_merge_into_populated_level_keeps_disjoint_tables() {
    let dir = TempDir::new().unwrap();
    let mut manifest = Manifest::new(options(dir.path(), vec![1, 1 << 30]))
        .insert_and_update(str_table(dir.path(), 1, &[("a", "1"), ("b", "1")]))
        .insert_and_update(str_table(dir.path(), 2, &[("x", "2"), ("y", "2")]));
    manifest.size_tiered_compaction(3).unwrap();
    assert_eq!(manifest.level(1).unwrap().ids(), vec![3]);

    // Level 1 now holds [a..y]; a new level 0 table overlapping it is merged
    let mut manifest = manifest
        .insert_and_update(str_table(dir.path(), 4, &[("b", "4"), ("c", "4")]));
    let outcome = manifest.size_tiered_compaction(5).unwrap();
    assert_eq!(outcome.created, vec![5]);
    assert_eq!(manifest.level(1).unwrap().ids(), vec![5]);
    assert_eq!(manifest.get(b"a"), Some(Bytes::from("1")));
    assert_eq!(manifest.get(b"b"), Some(Bytes::from("4")));
    assert_eq!(manifest.get(b"c"), Some(Bytes::from("4")));
    assert_eq!(manifest.get(b"y"), Some(Bytes::from("2")));
}

#[test]
fn test_persisted_manifest_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut manifest = Manifest::new(options(dir.path(), vec![1, 1 << 30]))
        .insert_and_update(int_table(dir.path(), 1, 0..1_000))
        .insert_and_update(int_table(dir.path(), 2, 1_000..2_000));
    manifest.size_tiered_compaction(3).unwrap();
    let manifest = manifest.insert_and_update(int_table(dir.path(), 4, 2_000..3_000));
    manifest.save().unwrap();

    let loaded = Manifest::load(options(dir.path(), vec![1, 1 << 30])).unwrap();
    assert_eq!(loaded.version(), manifest.version());
    assert_eq!(loaded.max_sst_id(), 4);
    assert_eq!(loaded.level(0).unwrap().ids(), vec![4]);
    assert_eq!(loaded.level(1).unwrap().ids(), vec![3]);
    assert_all_ints(&loaded, 0..3_000);
}

#[test]
fn test_load_without_file_starts_fresh() {
    let dir = TempDir::new().unwrap();
    let manifest = Manifest::load(options(dir.path(), vec![1024])).unwrap();
    assert_eq!(manifest.version(), 1);
    assert_eq!(manifest.table_count(), 0);
    assert_eq!(manifest.level_count(), 1);
}
