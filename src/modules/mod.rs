//! Module contract, factory catalog and registration handles.
//!
//! A capability module implements [`Module`].  The loader creates it from the
//! [`ModuleCatalog`] by name, then calls [`Module::register`] exactly once
//! with three handles:
//!
//! - a [`RouteRegistrar`] that binds request paths,
//! - a [`Publisher`] for emitting events,
//! - a [`Subscriber`] that binds event handlers.
//!
//! Both binding handles tag everything with the module's name, so the router
//! can release it all when the module is unloaded.  Modules never reference
//! each other; they share only event names ([`events`]).

pub mod loader;
pub mod plugins;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::RegistrationError;
use crate::memory::MemoryStore;
use crate::priority::{PriorityEngine, TaskBoard};
use crate::supervisor::dispatch::{EventHandler, RouteHandler, SubscriptionId};
use crate::supervisor::router::{EventRouter, Publisher};

pub use loader::{LoadReport, ModuleLoader};

/// Event names shared between modules.
pub mod events {
    pub const MEMORY_STORED: &str = "memory_stored";
    pub const TASK_ADDED: &str = "task_added";
    pub const TASK_COMPLETED: &str = "task_completed";
    pub const MORNING_CHECKIN: &str = "morning-checkin";
    pub const CHECKIN_READY: &str = "checkin_ready";
}

/// One entry of the enablement list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl ModuleEntry {
    pub fn enabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
        }
    }

    pub fn disabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: false,
        }
    }
}

/// Library handles a module may use directly.
#[derive(Clone, Debug)]
pub struct Services {
    pub memory: Arc<MemoryStore>,
    pub tasks: Arc<TaskBoard>,
    pub priority: PriorityEngine,
}

pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    /// Bind routes and subscriptions.  Called once per load.
    fn register(
        &self,
        routes: &mut RouteRegistrar<'_>,
        publisher: &Publisher,
        subscriber: &mut Subscriber<'_>,
    ) -> Result<(), RegistrationError>;
}

// ── Binding handles ──────────────────────────────────────────────────────────

/// Route registration scoped to one module.
pub struct RouteRegistrar<'a> {
    router: &'a EventRouter,
    module: &'a str,
    malformed: Vec<String>,
}

impl<'a> RouteRegistrar<'a> {
    pub(crate) fn new(router: &'a EventRouter, module: &'a str) -> Self {
        Self {
            router,
            module,
            malformed: Vec::new(),
        }
    }

    /// Bind `path`.  Paths are non-empty and contain no whitespace.
    pub fn route(&mut self, path: &str, handler: RouteHandler) -> Result<(), RegistrationError> {
        if path.is_empty() || path.chars().any(char::is_whitespace) {
            let detail = format!("invalid route path {path:?}");
            self.malformed.push(detail.clone());
            return Err(RegistrationError(detail));
        }
        self.router.register_route_owned(Some(self.module), path, handler);
        Ok(())
    }

    pub(crate) fn malformed(&self) -> &[String] {
        &self.malformed
    }
}

/// Event subscription scoped to one module.
pub struct Subscriber<'a> {
    router: &'a EventRouter,
    module: &'a str,
    malformed: Vec<String>,
}

impl<'a> Subscriber<'a> {
    pub(crate) fn new(router: &'a EventRouter, module: &'a str) -> Self {
        Self {
            router,
            module,
            malformed: Vec::new(),
        }
    }

    pub fn subscribe(
        &mut self,
        event: &str,
        handler: EventHandler,
    ) -> Result<SubscriptionId, RegistrationError> {
        if event.trim().is_empty() {
            let detail = format!("invalid event name {event:?}");
            self.malformed.push(detail.clone());
            return Err(RegistrationError(detail));
        }
        Ok(self.router.subscribe_owned(Some(self.module), event, handler))
    }

    pub(crate) fn malformed(&self) -> &[String] {
        &self.malformed
    }
}

// ── Catalog ──────────────────────────────────────────────────────────────────

pub type ModuleFactory = Arc<dyn Fn(&Services) -> Box<dyn Module> + Send + Sync>;

/// Name → factory.  Populated at startup; the enablement list selects from it.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    factories: BTreeMap<String, ModuleFactory>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every module compiled into this build.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        plugins::register_builtin(&mut catalog);
        catalog
    }

    /// Add a factory.  A later registration under the same name replaces it.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Services) -> Box<dyn Module> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub(crate) fn factory(&self, name: &str) -> Option<ModuleFactory> {
        self.factories.get(name).cloned()
    }
}

impl std::fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
