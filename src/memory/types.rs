use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form key-value metadata attached to an entry.
pub type Metadata = BTreeMap<String, String>;

/// One row of the record table.  Its vector lives in the index under the
/// same `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A recall hit with its distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recalled {
    #[serde(flatten)]
    pub entry: MemoryEntry,
    pub distance: f32,
}
