//! `journal` module: writes a memory note whenever a task is completed or a
//! check-in is produced.  Talks to the other modules only through events.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{HandlerError, RegistrationError};
use crate::memory::{MemoryStore, Metadata};
use crate::modules::events::{CHECKIN_READY, TASK_COMPLETED};
use crate::modules::{Module, RouteRegistrar, Subscriber};
use crate::supervisor::dispatch::handler;
use crate::supervisor::router::Publisher;

pub const NAME: &str = "journal";

pub struct JournalModule {
    memory: Arc<MemoryStore>,
}

impl JournalModule {
    pub fn new(memory: Arc<MemoryStore>) -> Self {
        Self { memory }
    }
}

fn note(memory: &MemoryStore, content: String, kind: &str, extra: &[(&str, &str)]) -> Result<(), HandlerError> {
    let mut metadata = Metadata::new();
    metadata.insert("source".into(), NAME.into());
    metadata.insert("kind".into(), kind.into());
    for (k, v) in extra {
        metadata.insert((*k).to_string(), (*v).to_string());
    }
    let id = memory
        .store(&content, metadata)
        .map_err(|e| HandlerError::new(format!("journal note failed: {e}")))?;
    debug!(%id, %kind, "journal note stored");
    Ok(())
}

fn field<'a>(payload: &'a Value, pointer: &str) -> Result<&'a str, HandlerError> {
    payload
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::new(format!("payload missing {pointer}")))
}

impl Module for JournalModule {
    fn name(&self) -> &str {
        NAME
    }

    fn register(
        &self,
        _routes: &mut RouteRegistrar<'_>,
        _publisher: &Publisher,
        subscriber: &mut Subscriber<'_>,
    ) -> Result<(), RegistrationError> {
        let memory = self.memory.clone();
        subscriber.subscribe(
            TASK_COMPLETED,
            handler(move |ev| {
                let title = field(&ev.payload, "/task/title")?;
                let id = field(&ev.payload, "/task/id")?;
                note(
                    &memory,
                    format!("Completed task: {title}"),
                    TASK_COMPLETED,
                    &[("task_id", id)],
                )
            }),
        )?;

        let memory = self.memory.clone();
        subscriber.subscribe(
            CHECKIN_READY,
            handler(move |ev| {
                let summary = field(&ev.payload, "/summary")?;
                note(&memory, summary.to_string(), CHECKIN_READY, &[])
            }),
        )?;

        Ok(())
    }
}
