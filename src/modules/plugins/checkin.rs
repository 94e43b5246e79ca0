//! `checkin` module: turns the scheduled `morning-checkin` event into a
//! summary of the top pending tasks.
//!
//! Publishes `checkin_ready` with the summary and serves the most recent one
//! at `checkin/latest`.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::error::{HandlerError, RegistrationError};
use crate::modules::events::{CHECKIN_READY, MORNING_CHECKIN};
use crate::modules::{Module, RouteRegistrar, Subscriber};
use crate::priority::{Task, TaskBoard};
use crate::supervisor::dispatch::{handler, route, to_response};
use crate::supervisor::router::Publisher;

pub const NAME: &str = "checkin";

const TOP_TASKS: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct Checkin {
    pub generated_at: DateTime<Utc>,
    pub pending: usize,
    pub top: Vec<Task>,
    pub summary: String,
}

impl Checkin {
    fn build(board: &TaskBoard) -> Self {
        let ranked = board.pending_ranked();
        let top: Vec<Task> = ranked.iter().take(TOP_TASKS).cloned().collect();
        let summary = if top.is_empty() {
            "Good morning. Nothing pending today.".to_string()
        } else {
            let titles: Vec<&str> = top.iter().map(|t| t.title.as_str()).collect();
            format!(
                "Good morning. {} pending; focus on: {}.",
                ranked.len(),
                titles.join(", ")
            )
        };
        Self {
            generated_at: Utc::now(),
            pending: ranked.len(),
            top,
            summary,
        }
    }
}

pub struct CheckinModule {
    board: Arc<TaskBoard>,
    latest: Arc<Mutex<Option<Checkin>>>,
}

impl CheckinModule {
    pub fn new(board: Arc<TaskBoard>) -> Self {
        Self {
            board,
            latest: Arc::new(Mutex::new(None)),
        }
    }
}

impl Module for CheckinModule {
    fn name(&self) -> &str {
        NAME
    }

    fn register(
        &self,
        routes: &mut RouteRegistrar<'_>,
        publisher: &Publisher,
        subscriber: &mut Subscriber<'_>,
    ) -> Result<(), RegistrationError> {
        let board = self.board.clone();
        let latest = self.latest.clone();
        let events = publisher.clone();
        subscriber.subscribe(
            MORNING_CHECKIN,
            handler(move |_| {
                let checkin = Checkin::build(&board);
                let payload = serde_json::to_value(&checkin)
                    .map_err(|e| HandlerError::new(format!("serialise checkin: {e}")))?;
                info!(pending = checkin.pending, "check-in ready");
                *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(checkin);
                events.publish(CHECKIN_READY, payload);
                Ok(())
            }),
        )?;

        let latest = self.latest.clone();
        routes.route(
            "checkin/latest",
            route(move |_| {
                let current = latest.lock().unwrap_or_else(PoisonError::into_inner).clone();
                Ok(json!({ "checkin": to_response(&current)? }))
            }),
        )?;

        Ok(())
    }
}
