//! `memory` module: request surface over the hybrid memory store.
//!
//! | path            | body                          | reply                 |
//! |-----------------|-------------------------------|-----------------------|
//! | `memory/add`    | `{content, metadata?}`        | `{id}`                |
//! | `memory/recall` | `{query, top_k?}`             | `{entries: [..]}`     |
//! | `memory/get`    | `{id}`                        | `{entry}` or `null`   |
//! | `memory/search` | `{key, value}`                | `{entries: [..]}`     |
//!
//! Publishes `memory_stored { id, content }` after every successful add.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::error::{MemoryError, RegistrationError};
use crate::memory::{MemoryStore, Metadata};
use crate::modules::events::MEMORY_STORED;
use crate::modules::{Module, RouteRegistrar, Subscriber};
use crate::supervisor::dispatch::{RouteError, parse_body, route, to_response};
use crate::supervisor::router::Publisher;

pub const NAME: &str = "memory";

const DEFAULT_TOP_K: usize = 5;

#[derive(Deserialize)]
struct AddBody {
    content: String,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Deserialize)]
struct RecallBody {
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Deserialize)]
struct GetBody {
    id: String,
}

#[derive(Deserialize)]
struct SearchBody {
    key: String,
    value: String,
}

pub struct MemoryModule {
    store: Arc<MemoryStore>,
}

impl MemoryModule {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

/// Caller mistakes are bad requests; everything else is internal.
fn route_error(e: MemoryError) -> RouteError {
    match e {
        MemoryError::InvalidQuery(_)
        | MemoryError::Embedding(_)
        | MemoryError::DimensionMismatch { .. } => RouteError::bad_request(e.to_string()),
        _ => RouteError::internal(e.to_string()),
    }
}

impl Module for MemoryModule {
    fn name(&self) -> &str {
        NAME
    }

    fn register(
        &self,
        routes: &mut RouteRegistrar<'_>,
        publisher: &Publisher,
        _subscriber: &mut Subscriber<'_>,
    ) -> Result<(), RegistrationError> {
        let store = self.store.clone();
        let publisher = publisher.clone();
        routes.route(
            "memory/add",
            route(move |body| {
                let body: AddBody = parse_body("memory/add", body)?;
                let id = store.store(&body.content, body.metadata).map_err(route_error)?;
                publisher.publish(MEMORY_STORED, json!({ "id": id, "content": body.content }));
                Ok(json!({ "id": id }))
            }),
        )?;

        let store = self.store.clone();
        routes.route(
            "memory/recall",
            route(move |body| {
                let body: RecallBody = parse_body("memory/recall", body)?;
                let entries = store.recall_scored(&body.query, body.top_k).map_err(route_error)?;
                Ok(json!({ "entries": to_response(&entries)? }))
            }),
        )?;

        let store = self.store.clone();
        routes.route(
            "memory/get",
            route(move |body| {
                let body: GetBody = parse_body("memory/get", body)?;
                let entry = store.get(&body.id).map_err(route_error)?;
                Ok(json!({ "entry": to_response(&entry)? }))
            }),
        )?;

        let store = self.store.clone();
        routes.route(
            "memory/search",
            route(move |body| {
                let body: SearchBody = parse_body("memory/search", body)?;
                let entries = store
                    .find_by_metadata(&body.key, &body.value)
                    .map_err(route_error)?;
                Ok(json!({ "entries": to_response(&entries)? }))
            }),
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{LexicalEmbedder, Metric};
    use crate::supervisor::dispatch::{ERR_BAD_REQUEST, handler};
    use crate::supervisor::router::EventRouter;
    use std::sync::Mutex;

    fn setup() -> (Arc<EventRouter>, Arc<Mutex<Vec<String>>>) {
        let router = Arc::new(EventRouter::new());
        let store = Arc::new(MemoryStore::in_memory(
            Arc::new(LexicalEmbedder::default()),
            Metric::Cosine,
        ));
        let module = MemoryModule::new(store);
        let mut routes = RouteRegistrar::new(&router, NAME);
        let mut subs = Subscriber::new(&router, NAME);
        module
            .register(&mut routes, &router.publisher(), &mut subs)
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        router.subscribe(
            MEMORY_STORED,
            handler(move |ev| {
                sink.lock().unwrap().push(ev.payload["content"].as_str().unwrap_or_default().to_string());
                Ok(())
            }),
        );
        (router, seen)
    }

    #[test]
    fn add_recall_get() {
        let (router, seen) = setup();
        let added = router
            .dispatch_route("memory/add", json!({ "content": "buy milk", "metadata": { "list": "errands" } }))
            .unwrap();
        let id = added["id"].as_str().unwrap().to_string();
        assert_eq!(*seen.lock().unwrap(), vec!["buy milk"]);

        let recalled = router
            .dispatch_route("memory/recall", json!({ "query": "grocery shopping", "top_k": 1 }))
            .unwrap();
        assert_eq!(recalled["entries"][0]["id"], id.as_str());

        let got = router.dispatch_route("memory/get", json!({ "id": id })).unwrap();
        assert_eq!(got["entry"]["content"], "buy milk");
        let missing = router.dispatch_route("memory/get", json!({ "id": "nope" })).unwrap();
        assert!(missing["entry"].is_null());

        let found = router
            .dispatch_route("memory/search", json!({ "key": "list", "value": "errands" }))
            .unwrap();
        assert_eq!(found["entries"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn bad_input_is_bad_request() {
        let (router, seen) = setup();
        let err = router.dispatch_route("memory/add", json!({ "content": "..." })).unwrap_err();
        assert_eq!(err.code, ERR_BAD_REQUEST);
        let err = router.dispatch_route("memory/recall", json!({ "query": "" })).unwrap_err();
        assert_eq!(err.code, ERR_BAD_REQUEST);
        let err = router.dispatch_route("memory/add", json!({ "nope": 1 })).unwrap_err();
        assert_eq!(err.code, ERR_BAD_REQUEST);
        assert!(seen.lock().unwrap().is_empty());
    }
}
