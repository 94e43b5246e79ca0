//! Integration tests for the event router and module loader.
//!
//! Run with:
//!   cargo test --test test_router

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde_json::json;

use tandem::error::{HandlerError, ModuleLoadError, RegistrationError};
use tandem::memory::{LexicalEmbedder, MemoryStore, Metric};
use tandem::modules::{
    Module, ModuleCatalog, ModuleEntry, ModuleLoader, RouteRegistrar, Services, Subscriber,
};
use tandem::priority::{PriorityEngine, TaskBoard};
use tandem::supervisor::dispatch::{ERR_METHOD_NOT_FOUND, handler, route};
use tandem::supervisor::router::{Binding, EventRouter, ModuleState, Publisher};

// ── helpers ──────────────────────────────────────────────────────────────────

type Log = Arc<Mutex<Vec<String>>>;

fn services() -> Services {
    Services {
        memory: Arc::new(MemoryStore::in_memory(
            Arc::new(LexicalEmbedder::default()),
            Metric::Cosine,
        )),
        tasks: Arc::new(TaskBoard::new(PriorityEngine::default())),
        priority: PriorityEngine::default(),
    }
}

#[derive(Clone, Copy)]
enum Behaviour {
    Ok,
    HandlerFails,
    HandlerPanics,
    RegisterFails,
}

/// A module that binds `<name>/ping`, subscribes to `task_added`, and logs
/// `<name>` when the event reaches it.
struct Stub {
    name: &'static str,
    behaviour: Behaviour,
    log: Log,
}

impl Module for Stub {
    fn name(&self) -> &str {
        self.name
    }

    fn register(
        &self,
        routes: &mut RouteRegistrar<'_>,
        _publisher: &Publisher,
        subscriber: &mut Subscriber<'_>,
    ) -> Result<(), RegistrationError> {
        let name = self.name;
        routes.route(&format!("{name}/ping"), route(move |_| Ok(json!({ "pong": name }))))?;

        let log = self.log.clone();
        let behaviour = self.behaviour;
        subscriber.subscribe(
            "task_added",
            handler(move |_| match behaviour {
                Behaviour::HandlerFails => Err(HandlerError::new("stub refused")),
                Behaviour::HandlerPanics => panic!("stub exploded"),
                _ => {
                    log.lock().unwrap().push(name.to_string());
                    Ok(())
                }
            }),
        )?;

        if let Behaviour::RegisterFails = self.behaviour {
            return Err(RegistrationError::new("missing credentials"));
        }
        Ok(())
    }
}

fn catalog(specs: &[(&'static str, Behaviour)], log: &Log) -> ModuleCatalog {
    let mut catalog = ModuleCatalog::new();
    for &(name, behaviour) in specs {
        let log = log.clone();
        catalog.register(name, move |_| {
            Box::new(Stub {
                name,
                behaviour,
                log: log.clone(),
            })
        });
    }
    catalog
}

fn owned_by(router: &EventRouter, module: &str) -> BTreeSet<Binding> {
    router
        .bindings()
        .into_iter()
        .filter(|b| b.owner() == Some(module))
        .collect()
}

// ── publish ─────────────────────────────────────────────────────────────────

#[test]
fn publish_without_subscribers_is_a_noop() {
    let router = EventRouter::new();
    router.publish("nobody-listens", json!({ "x": 1 }));
    assert_eq!(router.subscriber_count("nobody-listens"), 0);
}

#[test]
fn failing_subscriber_does_not_stop_later_ones() {
    for bad in [Behaviour::HandlerFails, Behaviour::HandlerPanics] {
        let log = Log::default();
        let router = Arc::new(EventRouter::new());
        let loader = ModuleLoader::new(
            router.clone(),
            catalog(&[("a", bad), ("b", Behaviour::Ok)], &log),
            services(),
        );
        let report = loader.load_modules(&[ModuleEntry::enabled("a"), ModuleEntry::enabled("b")]);
        assert!(report.is_clean());

        router.publish("task_added", json!({ "task": { "title": "x" } }));
        assert_eq!(*log.lock().unwrap(), vec!["b"]);
    }
}

#[test]
fn delivery_follows_subscription_order() {
    let router = EventRouter::new();
    let log = Log::default();
    for tag in ["first", "second", "third"] {
        let log = log.clone();
        router.subscribe(
            "tick",
            handler(move |_| {
                log.lock().unwrap().push(tag.to_string());
                Ok(())
            }),
        );
    }
    router.publish("tick", json!({}));
    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
}

// ── loader ──────────────────────────────────────────────────────────────────

#[test]
fn failed_registration_leaves_no_bindings_and_others_load() {
    let log = Log::default();
    let router = Arc::new(EventRouter::new());
    let loader = ModuleLoader::new(
        router.clone(),
        catalog(&[("a", Behaviour::RegisterFails), ("b", Behaviour::Ok)], &log),
        services(),
    );

    let report = loader.load_modules(&[
        ModuleEntry::enabled("a"),
        ModuleEntry::enabled("ghost"),
        ModuleEntry::enabled("b"),
    ]);

    assert_eq!(report.loaded, vec!["b"]);
    assert_eq!(report.failed.len(), 2);
    assert!(matches!(report.failed[0], ModuleLoadError::Registration { .. }));
    assert_eq!(
        report.failed[1],
        ModuleLoadError::Unknown { module: "ghost".into() }
    );

    assert!(owned_by(&router, "a").is_empty());
    assert_eq!(router.module("a").unwrap().state, ModuleState::Failed);
    assert_eq!(router.route_owner("b/ping").as_deref(), Some("b"));

    let err = router.dispatch_route("a/ping", json!({})).unwrap_err();
    assert_eq!(err.code, ERR_METHOD_NOT_FOUND);
}

#[test]
fn reload_removes_exactly_the_disabled_modules_bindings() {
    let log = Log::default();
    let router = Arc::new(EventRouter::new());
    let loader = ModuleLoader::new(
        router.clone(),
        catalog(&[("a", Behaviour::Ok), ("b", Behaviour::Ok)], &log),
        services(),
    );
    loader.load_modules(&[ModuleEntry::enabled("a"), ModuleEntry::enabled("b")]);

    let before = router.bindings();
    let owned_by_b = owned_by(&router, "b");
    assert!(!owned_by_b.is_empty());

    let report = loader.reload(&[ModuleEntry::enabled("a"), ModuleEntry::disabled("b")]);
    assert_eq!(report.kept, vec!["a"]);
    assert_eq!(report.unloaded, vec!["b"]);

    let after = router.bindings();
    let expected: BTreeSet<Binding> = before.difference(&owned_by_b).cloned().collect();
    assert_eq!(after, expected);

    let b = router.module("b").unwrap();
    assert_eq!(b.state, ModuleState::Disabled);
    assert_eq!(b.binding_count(), 0);

    router.publish("task_added", json!({}));
    assert_eq!(*log.lock().unwrap(), vec!["a"]);

    // Re-enabling brings the same binding set back.
    loader.reload(&[ModuleEntry::enabled("a"), ModuleEntry::enabled("b")]);
    let restored: BTreeSet<String> = router.route_paths().into_iter().collect();
    assert!(restored.contains("b/ping"));
    assert_eq!(router.subscriber_count("task_added"), 2);
}
