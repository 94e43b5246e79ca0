//! Shared in-memory task list.
//!
//! `priority_score` is never stored stale: every read recomputes it from the
//! task's inputs with the board's engine.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PriorityError;

use super::{PriorityEngine, check_input};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub urgency: f64,
    pub importance: f64,
    pub effort: f64,
    pub priority_score: f64,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

/// Input for [`TaskBoard::add`].  Missing scores default to the midpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default = "midpoint")]
    pub urgency: f64,
    #[serde(default = "midpoint")]
    pub importance: f64,
    #[serde(default = "midpoint")]
    pub effort: f64,
}

fn midpoint() -> f64 {
    5.0
}

impl NewTask {
    pub fn new(title: impl Into<String>, urgency: f64, importance: f64, effort: f64) -> Self {
        Self {
            title: title.into(),
            urgency,
            importance,
            effort,
        }
    }
}

/// Outcome of [`TaskBoard::complete`] for a known id.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// The task was pending and is now done.
    Completed(Task),
    /// The task was already done; nothing changed.
    AlreadyDone(Task),
}

impl Completion {
    pub fn task(&self) -> &Task {
        match self {
            Completion::Completed(t) | Completion::AlreadyDone(t) => t,
        }
    }
}

#[derive(Debug)]
pub struct TaskBoard {
    engine: PriorityEngine,
    tasks: Mutex<Vec<Task>>,
}

impl TaskBoard {
    pub fn new(engine: PriorityEngine) -> Self {
        Self {
            engine,
            tasks: Mutex::new(Vec::new()),
        }
    }

    // A panic while holding this lock cannot leave a half-written task: every
    // mutation is a single push or field store.
    fn lock(&self) -> MutexGuard<'_, Vec<Task>> {
        self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn scored(&self, task: &Task) -> Task {
        Task {
            priority_score: self.engine.score_task(task),
            ..task.clone()
        }
    }

    pub fn add(&self, new: NewTask) -> Result<Task, PriorityError> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(PriorityError::InvalidTask("title must not be empty".into()));
        }
        check_input("urgency", new.urgency)?;
        check_input("importance", new.importance)?;
        check_input("effort", new.effort)?;

        let mut task = Task {
            id: Uuid::now_v7().to_string(),
            title: title.to_string(),
            urgency: new.urgency,
            importance: new.importance,
            effort: new.effort,
            priority_score: 0.0,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
        };
        task.priority_score = self.engine.score_task(&task);
        self.lock().push(task.clone());
        Ok(task)
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.lock().iter().find(|t| t.id == id).map(|t| self.scored(t))
    }

    /// Mark a task done.  Returns `None` for an unknown id; completing a done
    /// task changes nothing and reports [`Completion::AlreadyDone`].
    pub fn complete(&self, id: &str) -> Option<Completion> {
        let mut tasks = self.lock();
        let task = tasks.iter_mut().find(|t| t.id == id)?;
        if task.status == TaskStatus::Done {
            return Some(Completion::AlreadyDone(self.scored(task)));
        }
        task.status = TaskStatus::Done;
        Some(Completion::Completed(self.scored(task)))
    }

    /// Every task: pending ones ranked first, then done ones ranked.
    pub fn list_ranked(&self) -> Vec<Task> {
        let snapshot = self.lock().clone();
        let (pending, done): (Vec<Task>, Vec<Task>) = snapshot
            .into_iter()
            .partition(|t| t.status == TaskStatus::Pending);
        let mut out = self.engine.rank(&pending);
        out.extend(self.engine.rank(&done));
        out
    }

    pub fn pending_ranked(&self) -> Vec<Task> {
        let pending: Vec<Task> = self
            .lock()
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .cloned()
            .collect();
        self.engine.rank(&pending)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
