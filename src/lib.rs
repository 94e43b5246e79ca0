//! tandem: coordination core for a personal productivity assistant.
//!
//! Capability modules never call each other.  They register request routes
//! and event subscriptions with the [`supervisor::router::EventRouter`] and
//! talk through it; the [`modules::ModuleLoader`] decides which ones are live.
//! Around that sit the [`scheduler`], the hybrid [`memory`] store and the
//! [`priority`] engine.

pub mod app;
pub mod config;
pub mod error;
pub mod logger;
pub mod memory;
pub mod modules;
pub mod priority;
pub mod runtime;
pub mod scheduler;
pub mod supervisor;
