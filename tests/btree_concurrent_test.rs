use std::sync::Arc;
use std::thread;
use anyhow::Result;

use stratadb::index::btree::GenericComparator;

mod common;
use common::{create_test_buffer_pool, key, rid, TestTree};

const READERS: usize = 8;
const LOOKUPS_PER_READER: usize = 10_000;
const KEY_COUNT: i64 = 10_000;

/// Eight reader threads hammer a prepopulated tree; every lookup must hit.
#[test]
fn test_concurrent_readers() -> Result<()> {
    let (pool, _file) = create_test_buffer_pool(128)?;
    let tree = Arc::new(TestTree::with_page_capacity(
        "readers",
        pool,
        GenericComparator::<8>,
    )?);

    for k in 0..KEY_COUNT {
        assert!(tree.insert(&key(k), &rid(k))?);
    }

    let mut handles = Vec::new();
    for reader in 0..READERS {
        let tree = tree.clone();
        handles.push(thread::spawn(move || -> Result<()> {
            for i in 0..LOOKUPS_PER_READER {
                let k = ((i * 31 + reader * 7) as i64) % KEY_COUNT;
                let found = tree.get_value(&key(k))?;
                assert_eq!(found, Some(rid(k)));
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().expect("reader thread panicked")?;
    }
    Ok(())
}

/// Four writers insert disjoint ranges through small nodes (lots of splits
/// under contention); the final scan sees every key exactly once, sorted.
#[test]
fn test_concurrent_writers_disjoint_ranges() -> Result<()> {
    let (pool, _file) = create_test_buffer_pool(256)?;
    let tree = Arc::new(TestTree::new(
        "writers",
        pool,
        GenericComparator::<8>,
        8,
        8,
    )?);

    const WRITERS: i64 = 4;
    const PER_WRITER: i64 = 500;

    let mut handles = Vec::new();
    for writer in 0..WRITERS {
        let tree = tree.clone();
        handles.push(thread::spawn(move || -> Result<()> {
            let base = writer * PER_WRITER;
            for k in base..base + PER_WRITER {
                assert!(tree.insert(&key(k), &rid(k))?);
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().expect("writer thread panicked")?;
    }

    let scanned: Vec<i64> = tree.begin()?.map(|(k, _)| k.to_i64()).collect();
    assert_eq!(scanned, (0..WRITERS * PER_WRITER).collect::<Vec<_>>());
    for k in 0..WRITERS * PER_WRITER {
        assert_eq!(tree.get_value(&key(k))?, Some(rid(k)));
    }
    Ok(())
}

/// Readers run while writers grow the tree; reads of already-inserted keys
/// never fail and never see torn values.
#[test]
fn test_readers_during_inserts() -> Result<()> {
    let (pool, _file) = create_test_buffer_pool(128)?;
    let tree = Arc::new(TestTree::new(
        "mixed",
        pool,
        GenericComparator::<8>,
        16,
        16,
    )?);

    // Seed half the key space first.
    const SEEDED: i64 = 1000;
    for k in 0..SEEDED {
        tree.insert(&key(k), &rid(k))?;
    }

    let writer = {
        let tree = tree.clone();
        thread::spawn(move || -> Result<()> {
            for k in SEEDED..SEEDED * 2 {
                assert!(tree.insert(&key(k), &rid(k))?);
            }
            Ok(())
        })
    };

    let mut readers = Vec::new();
    for reader in 0..4usize {
        let tree = tree.clone();
        readers.push(thread::spawn(move || -> Result<()> {
            for i in 0..5_000usize {
                let k = ((i * 13 + reader) as i64) % SEEDED;
                assert_eq!(tree.get_value(&key(k))?, Some(rid(k)));
            }
            Ok(())
        }));
    }

    writer.join().expect("writer thread panicked")?;
    for handle in readers {
        handle.join().expect("reader thread panicked")?;
    }

    let scanned = tree.begin()?.count();
    assert_eq!(scanned as i64, SEEDED * 2);
    Ok(())
}
