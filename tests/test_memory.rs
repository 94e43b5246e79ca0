//! Integration tests for the hybrid memory store.
//!
//! Run with:
//!   cargo test --test test_memory

use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use tandem::error::MemoryError;
use tandem::memory::{Embedder, LexicalEmbedder, MemoryStore, Metadata, Metric};

// ── helpers ──────────────────────────────────────────────────────────────────

fn volatile() -> MemoryStore {
    MemoryStore::in_memory(Arc::new(LexicalEmbedder::default()), Metric::Cosine)
}

fn meta(pairs: &[(&str, &str)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn assert_consistent(store: &MemoryStore) -> usize {
    let (records, vectors) = store.counts().unwrap();
    assert_eq!(records, vectors, "record table and vector index diverged");
    records
}

// ── scenarios ───────────────────────────────────────────────────────────────

#[test]
fn grocery_query_recalls_buy_milk() {
    let store = volatile();
    let milk = store.store("buy milk", Metadata::new()).unwrap();
    store.store("renew passport before the trip", Metadata::new()).unwrap();
    store.store("quarterly tax filing", Metadata::new()).unwrap();

    let hits = store.recall("grocery shopping", 1).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, milk);
    assert_eq!(hits[0].content, "buy milk");
}

#[test]
fn counts_agree_after_every_store_and_after_a_failed_one() {
    let store = volatile();
    for (i, text) in ["call mom", "book dentist", "pay electricity bill"].iter().enumerate() {
        store.store(text, Metadata::new()).unwrap();
        assert_eq!(assert_consistent(&store), i + 1);
    }

    let err = store
        .store_with_embedding("half written", Metadata::new(), vec![1.0; 3])
        .unwrap_err();
    assert!(matches!(err, MemoryError::DimensionMismatch { .. }));
    assert_eq!(assert_consistent(&store), 3);

    let err = store
        .store_with_embedding(
            "not a number",
            Metadata::new(),
            vec![f32::NAN; store.dimensions()],
        )
        .unwrap_err();
    assert!(matches!(err, MemoryError::Embedding(_) | MemoryError::DimensionMismatch { .. }));
    assert_eq!(assert_consistent(&store), 3);
}

#[test]
fn failed_snapshot_write_rolls_back_both_halves() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::open(
        dir.path(),
        Arc::new(LexicalEmbedder::default()),
        Metric::Cosine,
    )
    .unwrap();
    store.store("first", Metadata::new()).unwrap();

    // A directory squatting on the temp file path makes the write fail.
    std::fs::create_dir_all(dir.path().join("memory").join("store.json.tmp")).unwrap();
    assert!(store.store("second", Metadata::new()).is_err());
    assert_eq!(assert_consistent(&store), 1);
}

#[test]
fn recall_is_bounded_by_top_k_and_only_returns_stored_ids() {
    let store = volatile();
    for text in [
        "buy eggs",
        "buy bread",
        "gym session",
        "team standup notes",
        "plan weekend hike",
    ] {
        store.store(text, Metadata::new()).unwrap();
    }

    for top_k in [0, 1, 3, 5, 50] {
        let hits = store.recall("buy groceries", top_k).unwrap();
        assert!(hits.len() <= top_k);
        assert_eq!(hits.len(), top_k.min(5));
        for hit in &hits {
            assert_eq!(store.get(&hit.id).unwrap().as_ref(), Some(hit));
        }
    }

    let scored = store.recall_scored("buy groceries", 5).unwrap();
    assert!(scored.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn equal_distance_prefers_newer_entry() {
    let store = volatile();
    let older = store.store("water the plants", Metadata::new()).unwrap();
    let newer = store.store("water the plants", Metadata::new()).unwrap();

    let hits = store.recall("water the plants", 2).unwrap();
    assert_eq!(hits[0].id, newer);
    assert_eq!(hits[1].id, older);
}

#[test]
fn get_and_metadata_lookup() {
    let store = volatile();
    let id = store
        .store("dinner with Sam", meta(&[("kind", "social"), ("day", "fri")]))
        .unwrap();
    store.store("expense report", meta(&[("kind", "work")])).unwrap();

    let entry = store.get(&id).unwrap().unwrap();
    assert_eq!(entry.metadata.get("day").map(String::as_str), Some("fri"));
    assert!(store.get("no-such-id").unwrap().is_none());

    let social = store.find_by_metadata("kind", "social").unwrap();
    assert_eq!(social.len(), 1);
    assert_eq!(social[0].id, id);
}

#[test]
fn empty_query_is_rejected() {
    let store = volatile();
    store.store("anything", Metadata::new()).unwrap();
    assert!(matches!(
        store.recall("   ", 3),
        Err(MemoryError::InvalidQuery(_))
    ));
}

#[test]
fn concurrent_writers_keep_tables_in_lockstep() {
    let store = Arc::new(volatile());
    let workers: Vec<_> = (0..4)
        .map(|w| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    store.store(&format!("note {w}-{i}"), Metadata::new()).unwrap();
                    let (records, vectors) = store.counts().unwrap();
                    assert_eq!(records, vectors);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(assert_consistent(&store), 100);
}

#[test]
fn snapshot_reopens_with_same_entries() {
    let dir = TempDir::new().unwrap();
    let embedder: Arc<dyn Embedder> = Arc::new(LexicalEmbedder::default());
    let id = {
        let store = MemoryStore::open(dir.path(), embedder.clone(), Metric::Cosine).unwrap();
        store.store("buy milk", meta(&[("list", "errands")])).unwrap()
    };

    let reopened = MemoryStore::open(dir.path(), embedder.clone(), Metric::Cosine).unwrap();
    assert_eq!(assert_consistent(&reopened), 1);
    assert_eq!(reopened.get(&id).unwrap().unwrap().content, "buy milk");
    assert_eq!(reopened.recall("grocery shopping", 1).unwrap()[0].id, id);

    // A store built for another metric refuses the snapshot.
    assert!(MemoryStore::open(dir.path(), embedder, Metric::L2).is_err());
}
