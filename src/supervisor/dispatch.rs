//! Dispatch vocabulary shared by the router, the loader and every module.
//!
//! Two kinds of bindings exist:
//!
//! - **subscriptions**: `event name → handler`, fanned out by
//!   [`EventRouter::publish`](super::router::EventRouter::publish) to every
//!   subscriber in registration order;
//! - **routes**: `request path → handler`, invoked one-to-one by the
//!   request-serving collaborator through
//!   [`EventRouter::dispatch_route`](super::router::EventRouter::dispatch_route).
//!
//! Handlers are plain `Arc`'d closures.  Two subscriptions are "the same
//! handler" when they share the same `Arc` allocation.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HandlerError;

/// JSON-RPC style error codes carried by [`RouteError`].
pub const ERR_BAD_REQUEST: i32 = -32600;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INTERNAL: i32 = -32603;

/// A named event in flight.  Exists only for the duration of a dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub name: String,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            emitted_at: Utc::now(),
        }
    }
}

pub type HandlerResult = Result<(), HandlerError>;

/// Subscriber callback.
pub type EventHandler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// Request handler: parsed body in, structured response out.
pub type RouteHandler = Arc<dyn Fn(Value) -> RouteResult + Send + Sync>;

pub type RouteResult = Result<Value, RouteError>;

/// Wrap a closure as an [`EventHandler`].
pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a [`RouteHandler`].
pub fn route<F>(f: F) -> RouteHandler
where
    F: Fn(Value) -> RouteResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// `true` when both handles point at the same handler allocation.
pub(crate) fn same_handler(a: &EventHandler, b: &EventHandler) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Opaque handle returned by `subscribe`, accepted by `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Error returned to the request-serving collaborator.  The collaborator
/// owns mapping `code` onto its transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} ({code})")]
pub struct RouteError {
    pub code: i32,
    pub message: String,
}

impl RouteError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ERR_BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ERR_METHOD_NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ERR_INTERNAL, message)
    }
}

/// Deserialize a route body, mapping failures to [`ERR_BAD_REQUEST`].
pub fn parse_body<T: serde::de::DeserializeOwned>(path: &str, body: Value) -> Result<T, RouteError> {
    serde_json::from_value(body)
        .map_err(|e| RouteError::bad_request(format!("{path}: malformed body: {e}")))
}

/// Serialize a route response, mapping failures to [`ERR_INTERNAL`].
pub fn to_response<T: Serialize>(value: &T) -> RouteResult {
    serde_json::to_value(value).map_err(|e| RouteError::internal(format!("serialise response: {e}")))
}
