//! On-disk snapshot of a memory store.
//!
//! Layout under the work directory:
//!
//! ```text
//! memory/
//!   store.json   { version, metric, dimensions, records: [...], vectors: { id: [f32] } }
//! ```
//!
//! Records and vectors share one file so they are always opened and written
//! together.  Writes go to `store.json.tmp` first and are renamed into place.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

use super::embed::Metric;
use super::types::MemoryEntry;

const SNAPSHOT_VERSION: u32 = 1;
const SNAPSHOT_DIR: &str = "memory";
const SNAPSHOT_FILE: &str = "store.json";

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub version: u32,
    pub metric: Metric,
    pub dimensions: usize,
    pub records: Vec<MemoryEntry>,
    pub vectors: BTreeMap<String, Vec<f32>>,
}

impl Snapshot {
    pub(crate) fn new(
        metric: Metric,
        dimensions: usize,
        records: Vec<MemoryEntry>,
        vectors: BTreeMap<String, Vec<f32>>,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            metric,
            dimensions,
            records,
            vectors,
        }
    }

    /// Both tables must hold exactly the same ids.
    pub(crate) fn validate(&self) -> Result<(), MemoryError> {
        let record_ids: BTreeSet<&str> = self.records.iter().map(|r| r.id.as_str()).collect();
        let vector_ids: BTreeSet<&str> = self.vectors.keys().map(String::as_str).collect();
        if record_ids.len() != self.records.len() || record_ids != vector_ids {
            return Err(MemoryError::Consistency {
                records: self.records.len(),
                vectors: self.vectors.len(),
            });
        }
        Ok(())
    }
}

/// `{work_dir}/memory/store.json`
pub(crate) fn snapshot_path(work_dir: &Path) -> PathBuf {
    work_dir.join(SNAPSHOT_DIR).join(SNAPSHOT_FILE)
}

/// Read a snapshot, or `None` when the file does not exist yet.
pub(crate) fn load(path: &Path) -> Result<Option<Snapshot>, MemoryError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)
        .map_err(|e| MemoryError::Persist(format!("cannot read {}: {e}", path.display())))?;
    let snapshot: Snapshot = serde_json::from_str(&data)
        .map_err(|e| MemoryError::Persist(format!("malformed {}: {e}", path.display())))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(MemoryError::Persist(format!(
            "{}: unsupported snapshot version {}",
            path.display(),
            snapshot.version
        )));
    }
    Ok(Some(snapshot))
}

pub(crate) fn save(path: &Path, snapshot: &Snapshot) -> Result<(), MemoryError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| MemoryError::Persist(format!("cannot create {}: {e}", dir.display())))?;
    }
    let data = serde_json::to_string(snapshot)
        .map_err(|e| MemoryError::Persist(format!("serialise snapshot: {e}")))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data)
        .map_err(|e| MemoryError::Persist(format!("cannot write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| MemoryError::Persist(format!("cannot replace {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn entry(id: &str) -> MemoryEntry {
        MemoryEntry {
            id: id.into(),
            content: format!("note {id}"),
            created_at: Utc::now(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn missing_file_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(load(&snapshot_path(tmp.path())).unwrap().is_none());
    }

    #[test]
    fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = snapshot_path(tmp.path());
        let snap = Snapshot::new(
            Metric::Cosine,
            2,
            vec![entry("a")],
            BTreeMap::from([("a".to_string(), vec![1.0, 0.0])]),
        );
        save(&path, &snap).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = load(&path).unwrap().unwrap();
        loaded.validate().unwrap();
        assert_eq!(loaded.records[0].id, "a");
    }

    #[test]
    fn orphaned_vector_fails_validation() {
        let snap = Snapshot::new(
            Metric::L2,
            2,
            vec![entry("a")],
            BTreeMap::from([
                ("a".to_string(), vec![1.0, 0.0]),
                ("b".to_string(), vec![0.0, 1.0]),
            ]),
        );
        assert_eq!(
            snap.validate(),
            Err(MemoryError::Consistency { records: 1, vectors: 2 })
        );
    }

    #[test]
    fn malformed_file_is_persist_error() {
        let tmp = TempDir::new().unwrap();
        let path = snapshot_path(tmp.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load(&path), Err(MemoryError::Persist(_))));
    }
}
