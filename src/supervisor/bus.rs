//! Supervisor bus: the async front door to the router.
//!
//! Background services (the scheduler, the stdio adapter) never touch the
//! router directly.  They hold a cloneable [`BusHandle`] and either
//! `notify` (fire-and-forget event) or `request` (routed call with a reply).
//! The supervisor run loop owns the receiving end.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::dispatch::RouteResult;

pub enum BusMessage {
    /// Publish `event` to its subscribers.  No reply.
    Notification { event: String, payload: Value },
    /// Dispatch `path`; the result goes back on `reply_tx`.
    Request {
        id: Uuid,
        path: String,
        body: Value,
        reply_tx: oneshot::Sender<RouteResult>,
    },
}

/// Transport-level failure: the call never reached a handler, or its reply
/// was lost.  Handler errors travel inside the `RouteResult` instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusCallError {
    #[error("bus is full")]
    Full,
    #[error("bus is closed")]
    Closed,
    #[error("request dropped without a reply")]
    NoReply,
}

#[derive(Clone, Debug)]
pub struct BusHandle {
    tx: mpsc::Sender<BusMessage>,
}

impl BusHandle {
    /// Queue an event without waiting.  Fails fast if the bus is saturated.
    pub fn notify(&self, event: impl Into<String>, payload: Value) -> Result<(), BusCallError> {
        self.tx
            .try_send(BusMessage::Notification {
                event: event.into(),
                payload,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => BusCallError::Full,
                mpsc::error::TrySendError::Closed(_) => BusCallError::Closed,
            })
    }

    /// Dispatch `path` and wait for its reply.
    pub async fn request(
        &self,
        path: impl Into<String>,
        body: Value,
    ) -> Result<RouteResult, BusCallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BusMessage::Request {
                id: Uuid::new_v4(),
                path: path.into(),
                body,
                reply_tx,
            })
            .await
            .map_err(|_| BusCallError::Closed)?;
        reply_rx.await.map_err(|_| BusCallError::NoReply)
    }
}

/// Owns the supervisor-side receiver and a handle to clone out.
pub struct SupervisorBus {
    pub rx: mpsc::Receiver<BusMessage>,
    pub handle: BusHandle,
}

impl SupervisorBus {
    pub fn new(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        Self {
            rx,
            handle: BusHandle { tx },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notify_reports_full_and_closed() {
        let bus = SupervisorBus::new(1);
        bus.handle.notify("a", json!({})).unwrap();
        assert_eq!(bus.handle.notify("b", json!({})), Err(BusCallError::Full));

        let handle = bus.handle.clone();
        drop(bus);
        assert_eq!(handle.notify("c", json!({})), Err(BusCallError::Closed));
    }

    #[tokio::test]
    async fn request_gets_reply() {
        let mut bus = SupervisorBus::new(4);
        let handle = bus.handle.clone();
        tokio::spawn(async move {
            if let Some(BusMessage::Request { path, reply_tx, .. }) = bus.rx.recv().await {
                let _ = reply_tx.send(Ok(json!({ "echo": path })));
            }
        });
        let reply = handle.request("tasks/list", json!({})).await.unwrap().unwrap();
        assert_eq!(reply["echo"], "tasks/list");
    }

    #[tokio::test]
    async fn dropped_reply_is_no_reply() {
        let mut bus = SupervisorBus::new(4);
        let handle = bus.handle.clone();
        tokio::spawn(async move {
            // Receive and drop the reply sender.
            let _ = bus.rx.recv().await;
        });
        let err = handle.request("x", json!({})).await.unwrap_err();
        assert_eq!(err, BusCallError::NoReply);
    }
}
