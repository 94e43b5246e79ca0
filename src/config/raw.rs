//! Raw TOML deserialization types.
//!
//! These structs mirror the TOML file shape and use `serde` defaults.
//! The `load` module validates them and converts them into the public
//! `types` structs.

use serde::Deserialize;

use crate::memory::DEFAULT_DIMENSIONS;
use crate::modules::ModuleEntry;
use crate::priority::PriorityWeights;
use crate::scheduler::DEFAULT_TICK_SECS;

// ── Top-level ────────────────────────────────────────────────────────────────

/// Raw TOML shape, the serde target before resolution.
#[derive(Deserialize, Default)]
pub(super) struct RawConfig {
    #[serde(default)]
    pub supervisor: RawSupervisor,
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
    #[serde(default)]
    pub memory: RawMemory,
    #[serde(default)]
    pub priority: PriorityWeights,
    #[serde(default)]
    pub scheduler: RawScheduler,
}

#[derive(Deserialize)]
pub(super) struct RawSupervisor {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_bus_buffer")]
    pub bus_buffer: usize,
}

impl Default for RawSupervisor {
    fn default() -> Self {
        Self {
            name: default_name(),
            work_dir: default_work_dir(),
            log_level: default_log_level(),
            bus_buffer: default_bus_buffer(),
        }
    }
}

pub(super) fn default_name() -> String {
    "tandem".to_string()
}

pub(super) fn default_work_dir() -> String {
    "~/.tandem".to_string()
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_bus_buffer() -> usize {
    64
}

// ── Memory ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawMemory {
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_true")]
    pub persist: bool,
}

impl Default for RawMemory {
    fn default() -> Self {
        Self {
            metric: default_metric(),
            dimensions: default_dimensions(),
            persist: true,
        }
    }
}

fn default_metric() -> String {
    "cosine".to_string()
}

fn default_dimensions() -> usize {
    DEFAULT_DIMENSIONS
}

fn default_true() -> bool {
    true
}

// ── Scheduler ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawScheduler {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_true")]
    pub persist_state: bool,
    #[serde(default)]
    pub events: Vec<RawScheduledEvent>,
}

impl Default for RawScheduler {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            utc_offset_minutes: 0,
            persist_state: true,
            events: Vec::new(),
        }
    }
}

fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}

/// `[[scheduler.events]]` entry.  Exactly one of `daily` / `every_secs`.
#[derive(Deserialize)]
pub(super) struct RawScheduledEvent {
    pub name: String,
    #[serde(default)]
    pub daily: Option<String>,
    #[serde(default)]
    pub every_secs: Option<u64>,
}
