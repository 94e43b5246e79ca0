//! `tasks` module: task list with priority ranking.
//!
//! Routes: `tasks/add`, `tasks/list`, `tasks/complete`.
//! Publishes `task_added` / `task_completed`; listens to its own
//! `task_added` to recompute the ranking and log the new top task.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::error::RegistrationError;
use crate::modules::events::{TASK_ADDED, TASK_COMPLETED};
use crate::modules::{Module, RouteRegistrar, Subscriber};
use crate::priority::{Completion, NewTask, TaskBoard};
use crate::supervisor::dispatch::{RouteError, handler, parse_body, route, to_response};
use crate::supervisor::router::Publisher;

pub const NAME: &str = "tasks";

#[derive(Deserialize, Default)]
struct ListBody {
    #[serde(default)]
    pending_only: bool,
}

#[derive(Deserialize)]
struct CompleteBody {
    id: String,
}

pub struct TasksModule {
    board: Arc<TaskBoard>,
}

impl TasksModule {
    pub fn new(board: Arc<TaskBoard>) -> Self {
        Self { board }
    }
}

impl Module for TasksModule {
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
        let events = publisher.clone();
        routes.route(
            "tasks/add",
            route(move |body| {
                let new: NewTask = parse_body("tasks/add", body)?;
                let task = board.add(new).map_err(|e| RouteError::bad_request(e.to_string()))?;
                let task = to_response(&task)?;
                events.publish(TASK_ADDED, json!({ "task": task.clone() }));
                Ok(task)
            }),
        )?;

        let board = self.board.clone();
        routes.route(
            "tasks/list",
            route(move |body| {
                let body: ListBody = if body.is_null() {
                    ListBody::default()
                } else {
                    parse_body("tasks/list", body)?
                };
                let tasks = if body.pending_only {
                    board.pending_ranked()
                } else {
                    board.list_ranked()
                };
                Ok(json!({ "tasks": to_response(&tasks)? }))
            }),
        )?;

        let board = self.board.clone();
        let events = publisher.clone();
        routes.route(
            "tasks/complete",
            route(move |body| {
                let body: CompleteBody = parse_body("tasks/complete", body)?;
                let completion = board
                    .complete(&body.id)
                    .ok_or_else(|| RouteError::bad_request(format!("unknown task: {}", body.id)))?;
                let task = to_response(completion.task())?;
                if let Completion::Completed(_) = completion {
                    events.publish(TASK_COMPLETED, json!({ "task": task.clone() }));
                }
                Ok(task)
            }),
        )?;

        let board = self.board.clone();
        subscriber.subscribe(
            TASK_ADDED,
            handler(move |_| {
                let ranked = board.pending_ranked();
                if let Some(top) = ranked.first() {
                    info!(
                        top = %top.title,
                        score = top.priority_score,
                        pending = ranked.len(),
                        "priorities recomputed"
                    );
                }
                Ok(())
            }),
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::PriorityEngine;
    use crate::supervisor::dispatch::ERR_BAD_REQUEST;
    use crate::supervisor::router::EventRouter;
    use std::sync::Mutex;

    fn setup() -> (Arc<EventRouter>, Arc<Mutex<Vec<String>>>) {
        let router = Arc::new(EventRouter::new());
        let board = Arc::new(TaskBoard::new(PriorityEngine::default()));
        let mut routes = RouteRegistrar::new(&router, NAME);
        let mut subs = Subscriber::new(&router, NAME);
        TasksModule::new(board)
            .register(&mut routes, &router.publisher(), &mut subs)
            .unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        for name in [TASK_ADDED, TASK_COMPLETED] {
            let sink = events.clone();
            router.subscribe(
                name,
                handler(move |ev| {
                    sink.lock().unwrap().push(ev.name.clone());
                    Ok(())
                }),
            );
        }
        (router, events)
    }

    #[test]
    fn add_list_complete() {
        let (router, events) = setup();
        let rent = router
            .dispatch_route(
                "tasks/add",
                json!({ "title": "Pay rent", "importance": 9, "urgency": 8, "effort": 3 }),
            )
            .unwrap();
        router
            .dispatch_route(
                "tasks/add",
                json!({ "title": "Tidy desk", "importance": 5, "urgency": 7, "effort": 1 }),
            )
            .unwrap();

        let listed = router.dispatch_route("tasks/list", json!(null)).unwrap();
        assert_eq!(listed["tasks"][0]["title"], "Pay rent");
        assert_eq!(listed["tasks"][1]["title"], "Tidy desk");

        let done = router
            .dispatch_route("tasks/complete", json!({ "id": rent["id"] }))
            .unwrap();
        assert_eq!(done["status"], "done");

        let pending = router
            .dispatch_route("tasks/list", json!({ "pending_only": true }))
            .unwrap();
        assert_eq!(pending["tasks"].as_array().unwrap().len(), 1);

        assert_eq!(
            *events.lock().unwrap(),
            vec![TASK_ADDED, TASK_ADDED, TASK_COMPLETED]
        );
    }

    #[test]
    fn completing_twice_announces_once() {
        let (router, events) = setup();
        let task = router
            .dispatch_route("tasks/add", json!({ "title": "Call plumber" }))
            .unwrap();
        for _ in 0..2 {
            let done = router
                .dispatch_route("tasks/complete", json!({ "id": task["id"] }))
                .unwrap();
            assert_eq!(done["status"], "done");
        }
        assert_eq!(*events.lock().unwrap(), vec![TASK_ADDED, TASK_COMPLETED]);
    }

    #[test]
    fn invalid_task_is_rejected() {
        let (router, events) = setup();
        let err = router
            .dispatch_route("tasks/add", json!({ "title": "x", "importance": 42 }))
            .unwrap_err();
        assert_eq!(err.code, ERR_BAD_REQUEST);
        let err = router
            .dispatch_route("tasks/complete", json!({ "id": "missing" }))
            .unwrap_err();
        assert_eq!(err.code, ERR_BAD_REQUEST);
        assert!(events.lock().unwrap().is_empty());
    }
}
