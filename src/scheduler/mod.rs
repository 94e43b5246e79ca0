//! Scheduler: pure timekeeping plus event emission.
//!
//! [`Scheduler::fire_due`] is the decision step: given "now", emit every due
//! event once and stamp its `last_fired_at`.  [`SchedulerService`] drives it
//! from a `tokio::time::interval` on its own task and emits through the bus,
//! so handler work never runs on the timer task.

pub mod state;
pub mod trigger;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::runtime::{Component, ComponentFuture};
use crate::supervisor::bus::BusHandle;

pub use state::SchedulerState;
pub use trigger::Trigger;

/// Default evaluation granularity.
pub const DEFAULT_TICK_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledEvent {
    pub name: String,
    pub trigger: Trigger,
    pub last_fired_at: Option<DateTime<Utc>>,
}

impl ScheduledEvent {
    pub fn new(name: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            name: name.into(),
            trigger,
            last_fired_at: None,
        }
    }
}

#[derive(Debug)]
pub struct Scheduler {
    events: Vec<ScheduledEvent>,
    offset: FixedOffset,
    tick: Duration,
    state_path: Option<PathBuf>,
}

impl Scheduler {
    pub fn new(events: Vec<ScheduledEvent>, offset: FixedOffset) -> Self {
        Self {
            events,
            offset,
            tick: Duration::from_secs(DEFAULT_TICK_SECS),
            state_path: None,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_secs(1));
        self
    }

    /// Restore `last_fired_at` from `path` and keep it updated there.
    pub fn with_state_file(mut self, path: PathBuf) -> Result<Self, AppError> {
        let state = SchedulerState::load(&path)?;
        for event in &mut self.events {
            if let Some(at) = state.last_fired.get(&event.name) {
                event.last_fired_at = Some(*at);
            }
        }
        info!(path = %path.display(), restored = state.last_fired.len(), "scheduler state loaded");
        self.state_path = Some(path);
        Ok(self)
    }

    pub fn events(&self) -> &[ScheduledEvent] {
        &self.events
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Names of events due at `now`, without firing them.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<String> {
        self.events
            .iter()
            .filter(|e| e.trigger.is_due(now, e.last_fired_at, self.offset))
            .map(|e| e.name.clone())
            .collect()
    }

    /// Emit every due event once.  `emit` returns `false` when the event could
    /// not be handed off; such an event keeps its old `last_fired_at` and is
    /// retried on the next tick.  Returns the names that fired.
    pub fn fire_due<F>(&mut self, now: DateTime<Utc>, mut emit: F) -> Vec<String>
    where
        F: FnMut(&str) -> bool,
    {
        let mut fired = Vec::new();
        for event in &mut self.events {
            if !event.trigger.is_due(now, event.last_fired_at, self.offset) {
                continue;
            }
            if let Some(anchor) = event.trigger.anchor(now, self.offset) {
                let late = (now - anchor).to_std().unwrap_or_default();
                if late > self.tick * 2 {
                    info!(
                        event = %event.name,
                        late_secs = late.as_secs(),
                        "trigger missed; firing once on resume"
                    );
                }
            }
            if !emit(&event.name) {
                warn!(event = %event.name, "scheduled event not delivered; will retry next tick");
                continue;
            }
            info!(event = %event.name, trigger = %event.trigger, "scheduled event fired");
            event.last_fired_at = Some(now);
            fired.push(event.name.clone());
        }
        if !fired.is_empty() {
            self.save_state();
        }
        fired
    }

    fn save_state(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        let state = SchedulerState {
            version: 1,
            last_fired: self
                .events
                .iter()
                .filter_map(|e| e.last_fired_at.map(|at| (e.name.clone(), at)))
                .collect(),
        };
        if let Err(e) = state.save(path) {
            warn!(error = %e, "failed to persist scheduler state");
        }
    }
}

/// Timer loop that feeds [`Scheduler`] decisions into the bus.
pub struct SchedulerService {
    scheduler: Scheduler,
    bus: BusHandle,
}

impl SchedulerService {
    pub fn new(scheduler: Scheduler, bus: BusHandle) -> Self {
        Self { scheduler, bus }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.scheduler.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            events = self.scheduler.events().len(),
            tick_secs = self.scheduler.tick().as_secs(),
            "scheduler running"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("scheduler shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    let bus = &self.bus;
                    let fired = self.scheduler.fire_due(Utc::now(), |name| {
                        match bus.notify(name, json!({})) {
                            Ok(()) => true,
                            Err(e) => {
                                warn!(event = %name, error = %e, "scheduler: failed to emit event");
                                false
                            }
                        }
                    });
                    debug!(fired = fired.len(), "scheduler tick");
                }
            }
        }
    }
}

impl Component for SchedulerService {
    fn id(&self) -> &str {
        "scheduler"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(async move {
            (*self).run(shutdown).await;
            Ok(())
        })
    }
}
