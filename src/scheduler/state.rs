//! Persisted `last_fired_at` per event, in `{work_dir}/scheduler.json`.
//!
//! Only fire times are stored; event definitions always come from config.
//! Writes go to `scheduler.json.tmp` first and are renamed into place, so an
//! interrupted save leaves the previous state readable.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

const STATE_FILE: &str = "scheduler.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    #[serde(default = "default_state_version")]
    pub version: u8,
    #[serde(default)]
    pub last_fired: BTreeMap<String, DateTime<Utc>>,
}

fn default_state_version() -> u8 {
    1
}

pub fn state_path(work_dir: &Path) -> PathBuf {
    work_dir.join(STATE_FILE)
}

impl SchedulerState {
    /// Load state, or an empty state when the file is absent.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            return Ok(Self {
                version: default_state_version(),
                ..Self::default()
            });
        }
        let data = fs::read_to_string(path)
            .map_err(|e| AppError::Scheduler(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&data)
            .map_err(|e| AppError::Scheduler(format!("malformed {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Scheduler(format!("serialise scheduler state: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data)
            .map_err(|e| AppError::Scheduler(format!("cannot write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, path)
            .map_err(|e| AppError::Scheduler(format!("cannot replace {}: {e}", path.display())))
    }
}
