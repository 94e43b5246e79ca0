//! Hybrid memory store: a record table and a vector index kept in lockstep.
//!
//! ```text
//! MemoryStore
//!   └─ Mutex<Tables>
//!        ├─ records : id → MemoryEntry     (exact lookups)
//!        └─ index   : id → vector          (nearest-neighbour recall)
//! ```
//!
//! Every mutation takes the one lock, touches both halves, and rolls both
//! back if any step fails.  Callers never see either half directly, so no
//! reader can observe a record without its vector or the reverse.

pub mod embed;
mod index;
mod persist;
pub mod types;

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::MemoryError;

pub use embed::{DEFAULT_DIMENSIONS, Embedder, LexicalEmbedder, MIN_DIMENSIONS, Metric};
pub use types::{MemoryEntry, Metadata, Recalled};

use index::VectorIndex;
use persist::Snapshot;

struct Tables {
    records: HashMap<String, MemoryEntry>,
    index: VectorIndex,
}

impl Tables {
    fn counts(&self) -> (usize, usize) {
        (self.records.len(), self.index.len())
    }

    fn check(&self) -> Result<(), MemoryError> {
        let (records, vectors) = self.counts();
        if records != vectors {
            return Err(MemoryError::Consistency { records, vectors });
        }
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        let mut records: Vec<MemoryEntry> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let vectors: BTreeMap<String, Vec<f32>> = self
            .index
            .iter()
            .map(|(id, v)| (id.clone(), v.clone()))
            .collect();
        Snapshot::new(self.index.metric(), self.index.dims(), records, vectors)
    }

    fn rollback(&mut self, id: &str) {
        self.records.remove(id);
        self.index.remove(id);
    }
}

pub struct MemoryStore {
    embedder: Arc<dyn Embedder>,
    snapshot_path: Option<PathBuf>,
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// A volatile store.
    pub fn in_memory(embedder: Arc<dyn Embedder>, metric: Metric) -> Self {
        let dims = embedder.dimensions();
        Self {
            embedder,
            snapshot_path: None,
            tables: Mutex::new(Tables {
                records: HashMap::new(),
                index: VectorIndex::new(dims, metric),
            }),
        }
    }

    /// Open (or create) a persistent store under `work_dir/memory/`.
    ///
    /// Both tables are loaded from the same snapshot.  A snapshot whose
    /// tables disagree, or that was built with another metric or width, is
    /// refused.
    pub fn open(
        work_dir: &Path,
        embedder: Arc<dyn Embedder>,
        metric: Metric,
    ) -> Result<Self, MemoryError> {
        let path = persist::snapshot_path(work_dir);
        let store = Self {
            snapshot_path: Some(path.clone()),
            ..Self::in_memory(embedder, metric)
        };

        let Some(snapshot) = persist::load(&path)? else {
            info!(path = %path.display(), "memory store created");
            return Ok(store);
        };
        snapshot.validate()?;
        {
            let mut tables = store.lock()?;
            if snapshot.metric != tables.index.metric() || snapshot.dimensions != tables.index.dims() {
                return Err(MemoryError::Persist(format!(
                    "{} was built with {:?}/{} dims, store configured for {:?}/{} dims",
                    path.display(),
                    snapshot.metric,
                    snapshot.dimensions,
                    tables.index.metric(),
                    tables.index.dims()
                )));
            }
            let mut vectors = snapshot.vectors;
            for record in snapshot.records {
                let vector = vectors.remove(&record.id).ok_or(MemoryError::Consistency {
                    records: tables.records.len() + 1,
                    vectors: tables.index.len(),
                })?;
                tables.index.insert(&record.id, vector)?;
                tables.records.insert(record.id.clone(), record);
            }
            tables.check()?;
            info!(path = %path.display(), entries = tables.records.len(), "memory store opened");
        }
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, MemoryError> {
        self.tables.lock().map_err(|_| MemoryError::Poisoned)
    }

    pub fn metric(&self) -> Result<Metric, MemoryError> {
        Ok(self.lock()?.index.metric())
    }

    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    /// Embed `content` and store it.  Returns the new id.
    pub fn store(&self, content: &str, metadata: Metadata) -> Result<String, MemoryError> {
        // Embedding happens outside the lock.
        let embedding = self.embedder.embed(content)?;
        self.store_with_embedding(content, metadata, embedding)
    }

    /// Store `content` with a caller-supplied vector.
    pub fn store_with_embedding(
        &self,
        content: &str,
        metadata: Metadata,
        embedding: Vec<f32>,
    ) -> Result<String, MemoryError> {
        let entry = MemoryEntry {
            id: Uuid::now_v7().to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            metadata,
        };
        let id = entry.id.clone();

        let mut tables = self.lock()?;
        tables.records.insert(id.clone(), entry);
        if let Err(e) = tables.index.insert(&id, embedding) {
            tables.rollback(&id);
            warn!(%id, error = %e, "memory store rolled back: vector insert failed");
            return Err(e);
        }

        if let Some(path) = &self.snapshot_path {
            if let Err(e) = persist::save(path, &tables.snapshot()) {
                tables.rollback(&id);
                warn!(%id, error = %e, "memory store rolled back: snapshot write failed");
                return Err(e);
            }
        }

        if let Err(e) = tables.check() {
            tables.rollback(&id);
            warn!(%id, error = %e, "memory store rolled back: tables diverged");
            return Err(e);
        }

        debug!(%id, entries = tables.records.len(), "memory stored");
        Ok(id)
    }

    /// The `top_k` entries nearest to `query`, nearest first.
    pub fn recall(&self, query: &str, top_k: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        Ok(self
            .recall_scored(query, top_k)?
            .into_iter()
            .map(|hit| hit.entry)
            .collect())
    }

    /// Like [`recall`](Self::recall), with distances.
    ///
    /// Ties on distance go to the more recent entry.  Ids are time-ordered
    /// (UUIDv7), so equal timestamps fall back to the later id.
    pub fn recall_scored(&self, query: &str, top_k: usize) -> Result<Vec<Recalled>, MemoryError> {
        if query.trim().is_empty() {
            return Err(MemoryError::InvalidQuery("query must not be empty".into()));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let q = self.embedder.embed(query)?;

        let tables = self.lock()?;
        let mut hits: Vec<(&MemoryEntry, f32)> = tables
            .index
            .distances(&q)?
            .into_iter()
            .filter_map(|(id, d)| tables.records.get(id).map(|e| (e, d)))
            .collect();

        hits.sort_by(|(a, da), (b, db)| {
            da.total_cmp(db)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| b.id.cmp(&a.id))
        });
        hits.truncate(top_k);

        debug!(query_len = query.len(), top_k, hits = hits.len(), "memory recall");
        Ok(hits
            .into_iter()
            .map(|(entry, distance)| Recalled {
                entry: entry.clone(),
                distance,
            })
            .collect())
    }

    pub fn get(&self, id: &str) -> Result<Option<MemoryEntry>, MemoryError> {
        Ok(self.lock()?.records.get(id).cloned())
    }

    /// The stored vector for `id`.
    pub fn vector(&self, id: &str) -> Result<Option<Vec<f32>>, MemoryError> {
        Ok(self.lock()?.index.get(id).map(<[f32]>::to_vec))
    }

    /// Entries whose metadata has `key == value`, newest first.
    pub fn find_by_metadata(&self, key: &str, value: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        let tables = self.lock()?;
        let mut found: Vec<MemoryEntry> = tables
            .records
            .values()
            .filter(|e| e.metadata.get(key).is_some_and(|v| v == value))
            .cloned()
            .collect();
        found.sort_by(newest_first);
        Ok(found)
    }

    /// `(records, vectors)` read under one lock.
    pub fn counts(&self) -> Result<(usize, usize), MemoryError> {
        Ok(self.lock()?.counts())
    }

    pub fn len(&self) -> Result<usize, MemoryError> {
        Ok(self.lock()?.records.len())
    }

    pub fn is_empty(&self) -> Result<bool, MemoryError> {
        Ok(self.len()? == 0)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("dimensions", &self.embedder.dimensions())
            .field("persistent", &self.snapshot_path.is_some())
            .finish_non_exhaustive()
    }
}

fn newest_first(a: &MemoryEntry, b: &MemoryEntry) -> Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}
