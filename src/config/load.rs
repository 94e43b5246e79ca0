//! Configuration loading with env-var overrides.
//!
//! Reads TOML files, supports `[meta] base = "..."` inheritance chains,
//! and applies `TANDEM_WORK_DIR` and `TANDEM_LOG_LEVEL` env overrides.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use serde::Deserialize;

use crate::error::AppError;
use crate::memory::MIN_DIMENSIONS;
use crate::scheduler::{ScheduledEvent, Trigger};

use super::raw::{RawConfig, RawScheduledEvent, RawScheduler};
use super::types::*;

/// Compiled-in copy of `config/default.toml`, used when no file is found.
const BUILTIN_DEFAULT: &str = include_str!("../../config/default.toml");

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Deep-merge two TOML values.
/// Tables are merged recursively; the overlay only needs to specify keys that
/// differ from the base. For every other type (string, integer, array, …)
/// the overlay value replaces the base value wholesale, so an overlay that
/// lists `[[modules]]` replaces the whole module list.
fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, ov_val) in overlay_tbl {
                let merged = match base_tbl.remove(&key) {
                    Some(base_val) => merge_toml(base_val, ov_val),
                    None => ov_val,
                };
                base_tbl.insert(key, merged);
            }
            toml::Value::Table(base_tbl)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file, follow any `[meta] base = "..."` chain, and return the
/// fully merged `toml::Value`. `visited` carries canonicalized paths already
/// seen in this chain so circular references are caught early.
fn load_raw_merged(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<toml::Value, AppError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        return Err(AppError::Config(format!(
            "circular base reference detected at: {}",
            path.display()
        )));
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let overlay_val: toml::Value = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    if let Some(base_str) = overlay_val
        .get("meta")
        .and_then(|m| m.get("base"))
        .and_then(|b| b.as_str())
    {
        let base_path = if Path::new(base_str).is_absolute() {
            PathBuf::from(base_str)
        } else {
            path.parent().unwrap_or(Path::new(".")).join(base_str)
        };
        let base_val = load_raw_merged(&base_path, visited)?;
        Ok(merge_toml(base_val, overlay_val))
    } else {
        Ok(overlay_val)
    }
}

/// Load config from the given path, or `config/default.toml`, then apply env-var overrides.
/// If no path is given and `config/default.toml` does not exist, the compiled-in
/// default is used.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let work_dir_override = env::var("TANDEM_WORK_DIR").ok();
    let log_level_override = env::var("TANDEM_LOG_LEVEL").ok();

    if let Some(path) = config_path {
        return load_from(
            Path::new(path),
            work_dir_override.as_deref(),
            log_level_override.as_deref(),
        );
    }

    let default_path = Path::new("config/default.toml");
    if default_path.exists() {
        load_from(
            default_path,
            work_dir_override.as_deref(),
            log_level_override.as_deref(),
        )
    } else {
        load_builtin(work_dir_override.as_deref(), log_level_override.as_deref())
    }
}

/// Resolve the compiled-in default configuration.
pub fn load_builtin(
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let parsed: RawConfig = toml::from_str(BUILTIN_DEFAULT)
        .map_err(|e| AppError::Config(format!("builtin default: {e}")))?;
    resolve(parsed, work_dir_override, log_level_override)
}

/// Internal loader: accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
/// Follows `[meta] base = "..."` inheritance chains before resolving.
pub fn load_from(
    path: &Path,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let merged_val = load_raw_merged(path, &mut HashSet::new())?;

    let parsed: RawConfig = Deserialize::deserialize(merged_val).map_err(|e: toml::de::Error| {
        AppError::Config(format!("config error in {}: {e}", path.display()))
    })?;

    resolve(parsed, work_dir_override, log_level_override)
        .map_err(|e| match e {
            AppError::Config(msg) => AppError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
}

fn resolve(
    parsed: RawConfig,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let s = parsed.supervisor;

    let work_dir = expand_home(work_dir_override.unwrap_or(&s.work_dir));
    let log_level = log_level_override.unwrap_or(&s.log_level).to_string();

    crate::logger::parse_level(&log_level)
        .map_err(|e| AppError::Config(format!("supervisor.log_level: {e}")))?;

    if s.bus_buffer == 0 {
        return Err(AppError::Config("supervisor.bus_buffer must be at least 1".into()));
    }

    let mut seen = HashSet::new();
    for entry in &parsed.modules {
        if entry.name.trim().is_empty() {
            return Err(AppError::Config("modules: entry with empty name".into()));
        }
        if !seen.insert(entry.name.as_str()) {
            return Err(AppError::Config(format!("modules: '{}' listed twice", entry.name)));
        }
    }

    let metric = parsed
        .memory
        .metric
        .parse()
        .map_err(|e: String| AppError::Config(format!("memory.metric: {e}")))?;
    if parsed.memory.dimensions < MIN_DIMENSIONS {
        return Err(AppError::Config(format!(
            "memory.dimensions must be at least {MIN_DIMENSIONS}, got {}",
            parsed.memory.dimensions
        )));
    }

    parsed
        .priority
        .validate()
        .map_err(|e| AppError::Config(format!("priority: {e}")))?;

    let scheduler = resolve_scheduler(parsed.scheduler)?;

    Ok(Config {
        name: s.name,
        work_dir,
        log_level,
        bus_buffer: s.bus_buffer,
        modules: parsed.modules,
        memory: MemoryConfig {
            metric,
            dimensions: parsed.memory.dimensions,
            persist: parsed.memory.persist,
        },
        priority: parsed.priority,
        scheduler,
    })
}

fn resolve_scheduler(raw: RawScheduler) -> Result<SchedulerConfig, AppError> {
    if raw.tick_secs == 0 {
        return Err(AppError::Config("scheduler.tick_secs must be at least 1".into()));
    }
    if raw.utc_offset_minutes.unsigned_abs() >= MINUTES_PER_DAY {
        return Err(AppError::Config(format!(
            "scheduler.utc_offset_minutes out of range: {}",
            raw.utc_offset_minutes
        )));
    }
    let utc_offset = FixedOffset::east_opt(raw.utc_offset_minutes * 60).ok_or_else(|| {
        AppError::Config(format!(
            "scheduler.utc_offset_minutes out of range: {}",
            raw.utc_offset_minutes
        ))
    })?;

    let mut names = HashSet::new();
    let mut events = Vec::with_capacity(raw.events.len());
    for ev in raw.events {
        if !names.insert(ev.name.clone()) {
            return Err(AppError::Config(format!(
                "scheduler.events: '{}' defined twice",
                ev.name
            )));
        }
        events.push(resolve_event(ev)?);
    }

    Ok(SchedulerConfig {
        tick: Duration::from_secs(raw.tick_secs),
        utc_offset,
        persist_state: raw.persist_state,
        events,
    })
}

fn resolve_event(ev: RawScheduledEvent) -> Result<ScheduledEvent, AppError> {
    if ev.name.trim().is_empty() {
        return Err(AppError::Config("scheduler.events: entry with empty name".into()));
    }
    let trigger = match (ev.daily.as_deref(), ev.every_secs) {
        (Some(at), None) => Trigger::parse_daily(at),
        (None, Some(secs)) => Trigger::interval(secs),
        _ => Err("exactly one of `daily` or `every_secs` is required".to_string()),
    }
    .map_err(|e| AppError::Config(format!("scheduler.events '{}': {e}", ev.name)))?;
    Ok(ScheduledEvent::new(ev.name, trigger))
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
