//! Event router: the tagged dispatch table every module talks through.
//!
//! The router owns three tables behind one `RwLock`:
//!
//! ```text
//! subscriptions : event name   → [Subscription]   (registration order)
//! routes        : request path → RouteBinding      (last registration wins)
//! shadowed      : request path → [RouteBinding]    (overwritten, restorable)
//! modules       : module name  → ModuleRecord      (owned bindings + state)
//! ```
//!
//! Delivery is synchronous: [`EventRouter::publish`] snapshots the handler
//! list, releases the lock, then runs each handler to completion before the
//! next.  Handlers may publish or subscribe re-entrantly.  A handler that
//! returns `Err` or panics is logged and skipped; the publisher never sees it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use super::component_info::{ComponentInfo, ComponentStatus};
use super::dispatch::{
    Event, EventHandler, RouteError, RouteHandler, RouteResult, SubscriptionId, same_handler,
};

// ── Module registry ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Enabled,
    Disabled,
    Failed,
}

/// What the router knows about one module.
///
/// A module that is not `Enabled` always has empty `routes` and
/// `subscriptions`.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleRecord {
    pub name: String,
    pub state: ModuleState,
    pub routes: BTreeSet<String>,
    pub subscriptions: BTreeSet<SubscriptionId>,
    pub error: Option<String>,
}

impl ModuleRecord {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: ModuleState::Disabled,
            routes: BTreeSet::new(),
            subscriptions: BTreeSet::new(),
            error: None,
        }
    }

    pub fn binding_count(&self) -> usize {
        self.routes.len() + self.subscriptions.len()
    }
}

/// One active binding, as seen by [`EventRouter::bindings`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Binding {
    Route { path: String, owner: Option<String> },
    Subscription { event: String, id: SubscriptionId, owner: Option<String> },
}

impl Binding {
    pub fn owner(&self) -> Option<&str> {
        match self {
            Binding::Route { owner, .. } | Binding::Subscription { owner, .. } => owner.as_deref(),
        }
    }
}

/// Counts returned by [`EventRouter::release_module`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Released {
    pub routes: usize,
    pub subscriptions: usize,
}

// ── Tables ───────────────────────────────────────────────────────────────────

struct Subscription {
    id: SubscriptionId,
    owner: Option<String>,
    handler: EventHandler,
}

struct RouteBinding {
    owner: Option<String>,
    handler: RouteHandler,
}

#[derive(Default)]
struct Tables {
    subscriptions: HashMap<String, Vec<Subscription>>,
    /// subscription id → event name, for `unsubscribe`.
    by_id: HashMap<SubscriptionId, String>,
    routes: HashMap<String, RouteBinding>,
    /// Bindings displaced by a later owner, oldest first.  Releasing the
    /// owner of the active binding reinstates the top of the stack.
    shadowed: HashMap<String, Vec<RouteBinding>>,
    modules: BTreeMap<String, ModuleRecord>,
}

impl Tables {
    fn record_mut(&mut self, module: &str) -> &mut ModuleRecord {
        self.modules
            .entry(module.to_string())
            .or_insert_with(|| ModuleRecord::new(module))
    }
}

// ── EventRouter ──────────────────────────────────────────────────────────────

/// Process-wide publish/subscribe hub.  Construct one at startup, share it
/// behind `Arc`; tests build isolated instances.
#[derive(Default)]
pub struct EventRouter {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    // Handlers never run under the lock, so a poisoned lock only means one of
    // our own bookkeeping paths panicked; the tables are still coherent.
    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// A cloneable publish handle that does not keep the router alive.
    pub fn publisher(self: &Arc<Self>) -> Publisher {
        Publisher {
            router: Arc::downgrade(self),
        }
    }

    // ── Subscriptions ─────────────────────────────────────────────────

    /// Subscribe `handler` to `event`.  Idempotent per (event, handler) for a
    /// given owner; the same handler bound by two modules is two
    /// subscriptions, each released with its own module.
    pub fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionId {
        self.subscribe_owned(None, event, handler)
    }

    /// Subscribe on behalf of `owner`, so the binding is released with it.
    pub fn subscribe_owned(
        &self,
        owner: Option<&str>,
        event: &str,
        handler: EventHandler,
    ) -> SubscriptionId {
        let mut guard = self.write();
        let tables = &mut *guard;

        let list = tables.subscriptions.entry(event.to_string()).or_default();
        if let Some(existing) = list
            .iter()
            .find(|s| s.owner.as_deref() == owner && same_handler(&s.handler, &handler))
        {
            debug!(%event, id = %existing.id, "handler already subscribed");
            return existing.id;
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        list.push(Subscription {
            id,
            owner: owner.map(str::to_string),
            handler,
        });
        tables.by_id.insert(id, event.to_string());
        if let Some(owner) = owner {
            tables.record_mut(owner).subscriptions.insert(id);
        }
        debug!(%event, %id, module = owner.unwrap_or("-"), "subscribed");
        id
    }

    /// Remove one subscription.  Returns `false` if the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut guard = self.write();
        let tables = &mut *guard;

        let Some(event) = tables.by_id.remove(&id) else {
            return false;
        };
        let mut emptied = false;
        if let Some(list) = tables.subscriptions.get_mut(&event) {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                let sub = list.remove(pos);
                if let Some(owner) = sub.owner {
                    if let Some(record) = tables.modules.get_mut(&owner) {
                        record.subscriptions.remove(&id);
                    }
                }
            }
            emptied = list.is_empty();
        }
        if emptied {
            tables.subscriptions.remove(&event);
        }
        debug!(%event, %id, "unsubscribed");
        true
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.read().subscriptions.get(event).map_or(0, Vec::len)
    }

    /// Event names with at least one subscriber, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().subscriptions.keys().cloned().collect();
        names.sort();
        names
    }

    // ── Publish ───────────────────────────────────────────────────────

    /// Deliver `payload` to every subscriber of `name`, in registration order.
    pub fn publish(&self, name: &str, payload: Value) {
        let targets: Vec<(SubscriptionId, Option<String>, EventHandler)> = {
            let tables = self.read();
            match tables.subscriptions.get(name) {
                Some(list) => list
                    .iter()
                    .map(|s| (s.id, s.owner.clone(), s.handler.clone()))
                    .collect(),
                None => {
                    trace!(event = %name, "no subscribers");
                    return;
                }
            }
        };

        let event = Event::new(name, payload);
        debug!(event = %name, subscribers = targets.len(), "publishing");

        for (id, owner, handler) in targets {
            let module = owner.as_deref().unwrap_or("-");
            match panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => trace!(event = %name, %module, %id, "delivered"),
                Ok(Err(e)) => warn!(
                    event = %name,
                    %module,
                    handler = %id,
                    error = %e,
                    "subscriber failed; continuing"
                ),
                Err(p) => error!(
                    event = %name,
                    %module,
                    handler = %id,
                    error = %panic_message(p.as_ref()),
                    "subscriber panicked; continuing"
                ),
            }
        }
    }

    // ── Routes ────────────────────────────────────────────────────────

    pub fn register_route(&self, path: &str, handler: RouteHandler) {
        self.register_route_owned(None, path, handler);
    }

    /// Bind `path` on behalf of `owner`.  Last registration wins, with a
    /// warning; a binding displaced from another owner comes back if the new
    /// owner is released.
    pub fn register_route_owned(&self, owner: Option<&str>, path: &str, handler: RouteHandler) {
        let mut guard = self.write();
        let tables = &mut *guard;

        if let Some(stack) = tables.shadowed.get_mut(path) {
            stack.retain(|b| b.owner.as_deref() != owner);
        }
        let previous = tables.routes.insert(
            path.to_string(),
            RouteBinding {
                owner: owner.map(str::to_string),
                handler,
            },
        );
        if let Some(prev) = previous {
            warn!(
                %path,
                previous_owner = prev.owner.as_deref().unwrap_or("-"),
                owner = owner.unwrap_or("-"),
                "route re-registered; last registration wins"
            );
            if prev.owner.as_deref() != owner {
                if let Some(record) = prev.owner.as_ref().and_then(|o| tables.modules.get_mut(o)) {
                    record.routes.remove(path);
                }
                tables.shadowed.entry(path.to_string()).or_default().push(prev);
            }
        }
        if let Some(owner) = owner {
            tables.record_mut(owner).routes.insert(path.to_string());
        }
        debug!(%path, module = owner.unwrap_or("-"), "route registered");
    }

    /// Invoke the handler bound to `path`.
    pub fn dispatch_route(&self, path: &str, body: Value) -> RouteResult {
        let handler = self.read().routes.get(path).map(|b| b.handler.clone());
        let Some(handler) = handler else {
            return Err(RouteError::not_found(format!("route not found: {path}")));
        };
        match panic::catch_unwind(AssertUnwindSafe(|| handler(body))) {
            Ok(result) => result,
            Err(p) => {
                let msg = panic_message(p.as_ref());
                error!(%path, error = %msg, "route handler panicked");
                Err(RouteError::internal(format!("handler for {path} panicked: {msg}")))
            }
        }
    }

    pub fn route_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.read().routes.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn route_owner(&self, path: &str) -> Option<String> {
        self.read().routes.get(path).and_then(|b| b.owner.clone())
    }

    // ── Module registry ───────────────────────────────────────────────

    pub(crate) fn set_module_state(&self, module: &str, state: ModuleState, error: Option<String>) {
        let mut tables = self.write();
        let record = tables.record_mut(module);
        record.state = state;
        record.error = error;
    }

    /// Drop every route and subscription owned by `module`.
    pub fn release_module(&self, module: &str) -> Released {
        let mut guard = self.write();
        let tables = &mut *guard;

        let paths: Vec<String> = tables
            .routes
            .iter()
            .filter(|(_, b)| b.owner.as_deref() == Some(module))
            .map(|(p, _)| p.clone())
            .collect();
        tables.shadowed.retain(|_, stack| {
            stack.retain(|b| b.owner.as_deref() != Some(module));
            !stack.is_empty()
        });
        for path in &paths {
            tables.routes.remove(path);
            let restored = tables.shadowed.get_mut(path).and_then(Vec::pop);
            if let Some(binding) = restored {
                if let Some(owner) = binding.owner.as_deref() {
                    tables.record_mut(owner).routes.insert(path.clone());
                }
                info!(
                    %path,
                    module = binding.owner.as_deref().unwrap_or("-"),
                    "route restored to previous owner"
                );
                tables.routes.insert(path.clone(), binding);
            }
            if tables.shadowed.get(path).is_some_and(Vec::is_empty) {
                tables.shadowed.remove(path);
            }
        }

        let mut dropped: Vec<SubscriptionId> = Vec::new();
        tables.subscriptions.retain(|_, list| {
            list.retain(|s| {
                let owned = s.owner.as_deref() == Some(module);
                if owned {
                    dropped.push(s.id);
                }
                !owned
            });
            !list.is_empty()
        });
        for id in &dropped {
            tables.by_id.remove(id);
        }

        if let Some(record) = tables.modules.get_mut(module) {
            record.routes.clear();
            record.subscriptions.clear();
        }

        let released = Released {
            routes: paths.len(),
            subscriptions: dropped.len(),
        };
        if released != Released::default() {
            info!(
                %module,
                routes = released.routes,
                subscriptions = released.subscriptions,
                "module bindings released"
            );
        }
        released
    }

    pub fn module(&self, name: &str) -> Option<ModuleRecord> {
        self.read().modules.get(name).cloned()
    }

    /// Routes and subscription ids currently attributed to `module`.
    pub fn module_bindings(&self, module: &str) -> (BTreeSet<String>, BTreeSet<SubscriptionId>) {
        self.read()
            .modules
            .get(module)
            .map(|r| (r.routes.clone(), r.subscriptions.clone()))
            .unwrap_or_default()
    }

    /// All known modules, sorted by name.
    pub fn modules(&self) -> Vec<ModuleRecord> {
        self.read().modules.values().cloned().collect()
    }

    /// Snapshot of every active binding.
    pub fn bindings(&self) -> BTreeSet<Binding> {
        let tables = self.read();
        let routes = tables.routes.iter().map(|(path, b)| Binding::Route {
            path: path.clone(),
            owner: b.owner.clone(),
        });
        let subs = tables.subscriptions.iter().flat_map(|(event, list)| {
            list.iter().map(move |s| Binding::Subscription {
                event: event.clone(),
                id: s.id,
                owner: s.owner.clone(),
            })
        });
        routes.chain(subs).collect()
    }

    /// Router → modules → bindings.
    pub fn component_tree(&self) -> ComponentInfo {
        let tables = self.read();
        ComponentInfo {
            id: "router".to_string(),
            kind: "router".to_string(),
            state: ComponentStatus::On,
            detail: None,
            children: tables.modules.values().map(ComponentInfo::module).collect(),
        }
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.read();
        f.debug_struct("EventRouter")
            .field("events", &tables.subscriptions.len())
            .field("routes", &tables.routes.len())
            .field("modules", &tables.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ── Publisher ────────────────────────────────────────────────────────────────

/// Publish handle handed to modules.  Holds a `Weak` reference: handlers that
/// capture a publisher are stored inside the router they publish to.
#[derive(Clone)]
pub struct Publisher {
    router: Weak<EventRouter>,
}

impl Publisher {
    pub fn publish(&self, name: &str, payload: Value) {
        match self.router.upgrade() {
            Some(router) => router.publish(name, payload),
            None => debug!(event = %name, "router gone; event discarded"),
        }
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("live", &(self.router.strong_count() > 0))
            .finish()
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::supervisor::dispatch::{ERR_METHOD_NOT_FOUND, handler, route};
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> EventHandler {
        let log = log.clone();
        let tag = tag.to_string();
        handler(move |ev| {
            log.lock().unwrap().push(format!("{tag}:{}", ev.name));
            Ok(())
        })
    }

    #[test]
    fn delivers_in_registration_order() {
        let router = EventRouter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        router.subscribe("ping", recorder(&log, "a"));
        router.subscribe("ping", recorder(&log, "b"));
        router.subscribe("pong", recorder(&log, "c"));

        router.publish("ping", json!({}));
        assert_eq!(*log.lock().unwrap(), vec!["a:ping", "b:ping"]);
    }

    #[test]
    fn subscribe_is_idempotent_per_handler() {
        let router = EventRouter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let h = recorder(&log, "a");
        let first = router.subscribe("ping", h.clone());
        let second = router.subscribe("ping", h.clone());
        assert_eq!(first, second);
        assert_eq!(router.subscriber_count("ping"), 1);

        // Same handler on another event is a distinct subscription.
        let other = router.subscribe("pong", h);
        assert_ne!(first, other);
    }

    #[test]
    fn unsubscribe_removes_binding() {
        let router = EventRouter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = router.subscribe("ping", recorder(&log, "a"));
        assert!(router.unsubscribe(id));
        assert!(!router.unsubscribe(id));
        router.publish("ping", json!({}));
        assert!(log.lock().unwrap().is_empty());
        assert!(router.event_names().is_empty());
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let router = EventRouter::new();
        router.publish("nobody-listens", json!({"x": 1}));
    }

    #[test]
    fn failing_and_panicking_subscribers_do_not_stop_delivery() {
        let router = EventRouter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        router.subscribe("task_added", handler(|_| Err(HandlerError::new("nope"))));
        router.subscribe("task_added", handler(|_| panic!("kaboom")));
        router.subscribe("task_added", recorder(&log, "b"));

        router.publish("task_added", json!({}));
        assert_eq!(*log.lock().unwrap(), vec!["b:task_added"]);
    }

    #[test]
    fn handlers_may_publish_reentrantly() {
        let router = Arc::new(EventRouter::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let publisher = router.publisher();
        router.subscribe(
            "first",
            handler(move |_| {
                publisher.publish("second", json!({}));
                Ok(())
            }),
        );
        router.subscribe("second", recorder(&log, "x"));

        router.publish("first", json!({}));
        assert_eq!(*log.lock().unwrap(), vec!["x:second"]);
    }

    #[test]
    fn route_last_registration_wins() {
        let router = EventRouter::new();
        router.register_route_owned(Some("a"), "echo", route(|_| Ok(json!("a"))));
        router.register_route_owned(Some("b"), "echo", route(|_| Ok(json!("b"))));

        assert_eq!(router.dispatch_route("echo", json!({})).unwrap(), json!("b"));
        assert_eq!(router.route_owner("echo").as_deref(), Some("b"));
        assert!(router.module("a").unwrap().routes.is_empty());
        assert!(router.module("b").unwrap().routes.contains("echo"));
    }

    #[test]
    fn releasing_the_overwriting_owner_restores_the_route() {
        let router = EventRouter::new();
        router.register_route_owned(Some("a"), "echo", route(|_| Ok(json!("a"))));
        router.register_route_owned(Some("b"), "echo", route(|_| Ok(json!("b"))));
        router.register_route_owned(Some("c"), "echo", route(|_| Ok(json!("c"))));

        // Releasing a shadowed owner leaves the active binding alone.
        assert_eq!(router.release_module("b"), Released::default());
        assert_eq!(router.route_owner("echo").as_deref(), Some("c"));

        assert_eq!(router.release_module("c").routes, 1);
        assert_eq!(router.dispatch_route("echo", json!({})).unwrap(), json!("a"));
        assert!(router.module("a").unwrap().routes.contains("echo"));

        router.release_module("a");
        assert!(router.route_paths().is_empty());
    }

    #[test]
    fn shared_handler_is_released_per_owner() {
        let router = EventRouter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let h = recorder(&log, "shared");
        let a = router.subscribe_owned(Some("a"), "ping", h.clone());
        let again = router.subscribe_owned(Some("a"), "ping", h.clone());
        let b = router.subscribe_owned(Some("b"), "ping", h);
        assert_eq!(a, again);
        assert_ne!(a, b);

        router.release_module("a");
        router.publish("ping", json!({}));
        assert_eq!(*log.lock().unwrap(), vec!["shared:ping"]);
        assert!(router.module("b").unwrap().subscriptions.contains(&b));
    }

    #[test]
    fn unknown_route_is_not_found() {
        let router = EventRouter::new();
        let err = router.dispatch_route("missing", json!({})).unwrap_err();
        assert_eq!(err.code, ERR_METHOD_NOT_FOUND);
    }

    #[test]
    fn panicking_route_maps_to_internal_error() {
        let router = EventRouter::new();
        router.register_route("boom", route(|_| panic!("bad handler")));
        let err = router.dispatch_route("boom", json!({})).unwrap_err();
        assert!(err.message.contains("bad handler"));
    }

    #[test]
    fn release_module_drops_only_its_bindings() {
        let router = EventRouter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        router.subscribe_owned(Some("a"), "ping", recorder(&log, "a"));
        router.subscribe_owned(Some("b"), "ping", recorder(&log, "b"));
        router.register_route_owned(Some("a"), "a/x", route(|_| Ok(json!(null))));
        router.register_route_owned(Some("b"), "b/x", route(|_| Ok(json!(null))));

        let released = router.release_module("a");
        assert_eq!(released, Released { routes: 1, subscriptions: 1 });
        assert!(router.bindings().iter().all(|b| b.owner() == Some("b")));
        assert_eq!(router.module("a").unwrap().binding_count(), 0);

        router.publish("ping", json!({}));
        assert_eq!(*log.lock().unwrap(), vec!["b:ping"]);
    }

    #[test]
    fn publisher_outliving_router_is_harmless() {
        let router = Arc::new(EventRouter::new());
        let publisher = router.publisher();
        drop(router);
        publisher.publish("late", json!({}));
    }

    #[test]
    fn component_tree_reflects_state() {
        let router = EventRouter::new();
        router.register_route_owned(Some("tasks"), "tasks/list", route(|_| Ok(json!([]))));
        router.set_module_state("tasks", ModuleState::Enabled, None);
        router.set_module_state("broken", ModuleState::Failed, Some("boom".into()));

        let tree = router.component_tree();
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.count("route"), 1);
        let broken = tree.children.iter().find(|c| c.id == "broken").unwrap();
        assert_eq!(broken.state, ComponentStatus::Err);
    }
}
