//! Configuration: TOML file, `[meta] base` inheritance, env overrides.
//!
//! `raw` holds the serde shapes, `types` the validated structs handed to the
//! runtime, and `load` the file handling in between.  Any invalid entry is an
//! [`AppError::Config`](crate::error::AppError::Config) at startup.

mod load;
mod raw;
mod types;

pub use load::{expand_home, load, load_builtin, load_from};
pub use types::*;

#[cfg(test)]
impl Config {
    pub(crate) fn test_default(work_dir: &std::path::Path) -> Self {
        let mut cfg = load_builtin(work_dir.to_str(), Some("debug")).expect("builtin config");
        cfg.memory.persist = false;
        cfg.scheduler.persist_state = false;
        cfg
    }
}
