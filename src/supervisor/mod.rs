//! Supervisor: owns the bus receiver and feeds the router.
//!
//! Notifications go through one ordered dispatcher task so events are
//! delivered in the order they were queued.  Requests are dispatched
//! concurrently; each gets its own blocking task and replies on its oneshot.

pub mod adapters;
pub mod bus;
pub mod component_info;
pub mod dispatch;
pub mod router;

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::runtime::{Component, ComponentFuture};

use bus::{BusMessage, SupervisorBus};
use dispatch::{RouteError, route};
use router::EventRouter;

/// Built-in route answering with the component tree.
pub const STATUS_ROUTE: &str = "manage/status";

/// Register routes the supervisor itself serves.
pub fn register_builtin_routes(router: &Arc<EventRouter>) {
    let started = Instant::now();
    let weak = Arc::downgrade(router);
    router.register_route(
        STATUS_ROUTE,
        route(move |_| {
            let router = weak
                .upgrade()
                .ok_or_else(|| RouteError::internal("router is shutting down"))?;
            let tree = router.component_tree();
            Ok(json!({
                "uptime_ms": started.elapsed().as_millis() as u64,
                "modules": tree.children.len(),
                "routes": router.route_paths(),
                "events": router.event_names(),
                "tree": tree,
            }))
        }),
    );
}

/// Run the supervisor loop until `shutdown` is cancelled or the bus closes.
pub async fn run(mut bus: SupervisorBus, router: Arc<EventRouter>, shutdown: CancellationToken) {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<(String, Value)>();
    let dispatcher = tokio::spawn(dispatch_events(router.clone(), event_rx));

    info!(routes = ?router.route_paths(), "supervisor ready");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("supervisor shutting down");
                break;
            }

            msg = bus.rx.recv() => {
                match msg {
                    Some(BusMessage::Notification { event, payload }) => {
                        debug!(%event, "queueing notification");
                        if event_tx.send((event, payload)).is_err() {
                            warn!("event dispatcher gone; notification dropped");
                        }
                    }
                    Some(BusMessage::Request { id, path, body, reply_tx }) => {
                        debug!(%id, %path, "routing request");
                        let router = router.clone();
                        tokio::spawn(async move {
                            let target = path.clone();
                            let result = tokio::task::spawn_blocking(move || {
                                router.dispatch_route(&target, body)
                            })
                            .await
                            .unwrap_or_else(|e| {
                                Err(RouteError::internal(format!("request task failed: {e}")))
                            });
                            if reply_tx.send(result).is_err() {
                                debug!(%id, %path, "requester went away before reply");
                            }
                        });
                    }
                    None => {
                        info!("bus closed, supervisor exiting");
                        break;
                    }
                }
            }
        }
    }

    drop(event_tx);
    if let Err(e) = dispatcher.await {
        error!("event dispatcher failed: {e}");
    }
}

/// The supervisor loop as a runtime [`Component`].
pub struct SupervisorService {
    bus: SupervisorBus,
    router: Arc<EventRouter>,
}

impl SupervisorService {
    pub fn new(bus: SupervisorBus, router: Arc<EventRouter>) -> Self {
        Self { bus, router }
    }
}

impl Component for SupervisorService {
    fn id(&self) -> &str {
        "supervisor"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(async move {
            run(self.bus, self.router, shutdown).await;
            Ok(())
        })
    }
}

/// Publish queued events one at a time, in arrival order.
async fn dispatch_events(router: Arc<EventRouter>, mut rx: mpsc::UnboundedReceiver<(String, Value)>) {
    while let Some((event, payload)) = rx.recv().await {
        let router = router.clone();
        let name = event.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || router.publish(&name, payload)).await {
            error!(%event, "event dispatch task failed: {e}");
        }
    }
    debug!("event dispatcher drained");
}
