//! Module loader: turns the enablement list into live router bindings.
//!
//! Registration is transactional per module: if the entry point returns an
//! error, panics, or attempted a malformed binding, everything it already
//! bound is released and the module is marked failed.  One module's failure
//! never stops the others from loading.

use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::ModuleLoadError;
use crate::supervisor::router::{EventRouter, ModuleState, Released, panic_message};

use super::{ModuleCatalog, ModuleEntry, RouteRegistrar, Services, Subscriber};

/// Outcome of a `load_modules` or `reload` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Newly registered this pass.
    pub loaded: Vec<String>,
    /// Already enabled and left untouched.
    pub kept: Vec<String>,
    /// Listed with `enabled = false`.
    pub disabled: Vec<String>,
    /// Previously enabled, released this pass.
    pub unloaded: Vec<String>,
    pub failed: Vec<ModuleLoadError>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct ModuleLoader {
    router: Arc<EventRouter>,
    catalog: ModuleCatalog,
    services: Services,
}

impl ModuleLoader {
    pub fn new(router: Arc<EventRouter>, catalog: ModuleCatalog, services: Services) -> Self {
        Self {
            router,
            catalog,
            services,
        }
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    fn is_enabled(&self, name: &str) -> bool {
        self.router
            .module(name)
            .is_some_and(|r| r.state == ModuleState::Enabled)
    }

    /// Load every enabled entry; disabled entries are recorded (and released
    /// if they were live).
    pub fn load_modules(&self, entries: &[ModuleEntry]) -> LoadReport {
        let mut report = LoadReport::default();
        let mut seen = BTreeSet::new();

        for entry in entries {
            if !seen.insert(entry.name.as_str()) {
                debug!(module = %entry.name, "duplicate enablement entry ignored");
                continue;
            }
            self.apply(entry, &mut report);
        }

        info!(
            loaded = ?report.loaded,
            disabled = ?report.disabled,
            failed = report.failed.len(),
            "modules loaded"
        );
        report
    }

    /// Bring the router in line with a new enablement list: release modules
    /// that are now disabled or absent, load newly enabled ones, keep the rest.
    pub fn reload(&self, entries: &[ModuleEntry]) -> LoadReport {
        let mut report = LoadReport::default();
        let wanted: BTreeSet<&str> = entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.name.as_str())
            .collect();

        for record in self.router.modules() {
            if record.state == ModuleState::Enabled && !wanted.contains(record.name.as_str()) {
                self.unload_module(&record.name);
                report.unloaded.push(record.name);
            }
        }

        let mut seen = BTreeSet::new();
        for entry in entries {
            if seen.insert(entry.name.as_str()) {
                self.apply(entry, &mut report);
            }
        }

        info!(
            loaded = ?report.loaded,
            kept = ?report.kept,
            unloaded = ?report.unloaded,
            failed = report.failed.len(),
            "modules reloaded"
        );
        report
    }

    fn apply(&self, entry: &ModuleEntry, report: &mut LoadReport) {
        if !entry.enabled {
            if self.is_enabled(&entry.name) {
                self.unload_module(&entry.name);
                report.unloaded.push(entry.name.clone());
            } else {
                self.router
                    .set_module_state(&entry.name, ModuleState::Disabled, None);
            }
            report.disabled.push(entry.name.clone());
            return;
        }
        if self.is_enabled(&entry.name) {
            report.kept.push(entry.name.clone());
            return;
        }
        match self.load_module(&entry.name) {
            Ok(()) => report.loaded.push(entry.name.clone()),
            Err(e) => report.failed.push(e),
        }
    }

    /// Create `name` from the catalog and run its entry point.
    pub fn load_module(&self, name: &str) -> Result<(), ModuleLoadError> {
        if self.is_enabled(name) {
            debug!(module = %name, "already loaded");
            return Ok(());
        }

        let result = self.register(name);
        match &result {
            Ok(()) => {
                self.router.set_module_state(name, ModuleState::Enabled, None);
                let (routes, subscriptions) = self.router.module_bindings(name);
                info!(
                    module = %name,
                    routes = routes.len(),
                    subscriptions = subscriptions.len(),
                    "module loaded"
                );
            }
            Err(e) => {
                self.router.release_module(name);
                self.router
                    .set_module_state(name, ModuleState::Failed, Some(e.to_string()));
                error!(module = %name, error = %e, "module failed to load; skipped");
            }
        }
        result
    }

    fn register(&self, name: &str) -> Result<(), ModuleLoadError> {
        let factory = self.catalog.factory(name).ok_or_else(|| ModuleLoadError::Unknown {
            module: name.to_string(),
        })?;

        let publisher = self.router.publisher();
        let mut routes = RouteRegistrar::new(&self.router, name);
        let mut subscriber = Subscriber::new(&self.router, name);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let module = factory(&self.services);
            module.register(&mut routes, &publisher, &mut subscriber)
        }));

        match outcome {
            Err(p) => Err(ModuleLoadError::Panicked {
                module: name.to_string(),
                message: panic_message(p.as_ref()),
            }),
            Ok(Err(e)) => Err(ModuleLoadError::Registration {
                module: name.to_string(),
                reason: e.to_string(),
            }),
            Ok(Ok(())) => match routes.malformed().iter().chain(subscriber.malformed()).next() {
                Some(detail) => Err(ModuleLoadError::MalformedBinding {
                    module: name.to_string(),
                    detail: detail.clone(),
                }),
                None => Ok(()),
            },
        }
    }

    /// Release every route and subscription attributed to `name` and mark it
    /// disabled.
    pub fn unload_module(&self, name: &str) -> Released {
        let released = self.router.release_module(name);
        self.router.set_module_state(name, ModuleState::Disabled, None);
        info!(
            module = %name,
            routes = released.routes,
            subscriptions = released.subscriptions,
            "module unloaded"
        );
        released
    }
}
