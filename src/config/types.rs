//! Public configuration types.
//!
//! These are the resolved, validated structs the runtime consumes.
//! Raw TOML deserialization types live in `raw.rs`.

use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;

use crate::memory::Metric;
use crate::modules::ModuleEntry;
use crate::priority::PriorityWeights;
use crate::scheduler::ScheduledEvent;

// ── Memory ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Distance used by the vector index; fixed for the life of a store.
    pub metric: Metric,
    /// Embedding width.
    pub dimensions: usize,
    /// Snapshot both tables to `work_dir/memory/store.json` after each write.
    pub persist: bool,
}

// ── Scheduler ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick: Duration,
    /// Offset daily triggers are evaluated in.
    pub utc_offset: FixedOffset,
    /// Keep `last_fired_at` across restarts in `work_dir/scheduler.json`.
    pub persist_state: bool,
    pub events: Vec<ScheduledEvent>,
}

// ── Top-level ────────────────────────────────────────────────────────────────

/// Fully resolved supervisor configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub work_dir: PathBuf,
    pub log_level: String,
    /// Capacity of the supervisor bus channel.
    pub bus_buffer: usize,
    /// Module enablement list, in load order.
    pub modules: Vec<ModuleEntry>,
    pub memory: MemoryConfig,
    pub priority: PriorityWeights,
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Names of the modules marked enabled.
    pub fn enabled_modules(&self) -> Vec<&str> {
        self.modules
            .iter()
            .filter(|m| m.enabled)
            .map(|m| m.name.as_str())
            .collect()
    }
}
