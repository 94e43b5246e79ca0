//! Priority engine: a pure, weighted score over importance, urgency and effort.
//!
//! ```text
//! score = importance·W_I + urgency·W_U − effort·W_E
//! ```
//!
//! Inputs are on a 0–10 scale.  Nothing here touches the router or a store.

pub mod tasks;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::PriorityError;

pub use tasks::{Completion, NewTask, Task, TaskBoard, TaskStatus};

pub const DEFAULT_IMPORTANCE_WEIGHT: f64 = 0.6;
pub const DEFAULT_URGENCY_WEIGHT: f64 = 0.3;
pub const DEFAULT_EFFORT_WEIGHT: f64 = 0.1;

const SCALE_MAX: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub importance: f64,
    pub urgency: f64,
    pub effort: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            importance: DEFAULT_IMPORTANCE_WEIGHT,
            urgency: DEFAULT_URGENCY_WEIGHT,
            effort: DEFAULT_EFFORT_WEIGHT,
        }
    }
}

impl PriorityWeights {
    /// Weights must be finite and non-negative, so importance and urgency can
    /// only raise a score and effort can only lower it.
    pub fn validate(&self) -> Result<(), PriorityError> {
        for (name, w) in [
            ("importance", self.importance),
            ("urgency", self.urgency),
            ("effort", self.effort),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(PriorityError::InvalidWeights(format!(
                    "{name} weight must be finite and >= 0, got {w}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriorityEngine {
    weights: PriorityWeights,
}

impl PriorityEngine {
    pub fn new(weights: PriorityWeights) -> Result<Self, PriorityError> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn score(&self, urgency: f64, importance: f64, effort: f64) -> Result<f64, PriorityError> {
        check_input("urgency", urgency)?;
        check_input("importance", importance)?;
        check_input("effort", effort)?;
        Ok(self.raw_score(urgency, importance, effort))
    }

    fn raw_score(&self, urgency: f64, importance: f64, effort: f64) -> f64 {
        let w = &self.weights;
        importance * w.importance + urgency * w.urgency - effort * w.effort
    }

    /// Score of a task's current inputs.  Task inputs are validated on the way
    /// into a [`TaskBoard`], so this cannot fail.
    pub fn score_task(&self, task: &Task) -> f64 {
        self.raw_score(task.urgency, task.importance, task.effort)
    }

    /// Sort descending by score; ties go to the earlier `created_at`, then to
    /// the smaller id.  Deterministic for any input order.
    pub fn rank(&self, tasks: &[Task]) -> Vec<Task> {
        let mut ranked: Vec<Task> = tasks
            .iter()
            .map(|t| Task {
                priority_score: self.score_task(t),
                ..t.clone()
            })
            .collect();
        ranked.sort_by(|a, b| self.compare(a, b));
        ranked
    }

    /// Ranking order: higher score first, then earlier `created_at`, then id.
    pub fn compare(&self, a: &Task, b: &Task) -> Ordering {
        self.score_task(b)
            .total_cmp(&self.score_task(a))
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    }
}

pub(crate) fn check_input(field: &'static str, value: f64) -> Result<(), PriorityError> {
    if !value.is_finite() || !(0.0..=SCALE_MAX).contains(&value) {
        return Err(PriorityError::OutOfRange { field, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn engine() -> PriorityEngine {
        PriorityEngine::default()
    }

    #[test]
    fn default_weights() {
        let score = engine().score(8.0, 9.0, 3.0).unwrap();
        assert!((score - 7.5).abs() < 1e-9);
    }

    #[test]
    fn important_urgent_task_beats_lighter_one() {
        let e = engine();
        let a = e.score(8.0, 9.0, 3.0).unwrap();
        let b = e.score(7.0, 5.0, 1.0).unwrap();
        assert!(a > b);
    }

    #[test]
    fn monotonic_in_each_input() {
        let e = engine();
        for step in 0..10 {
            let lo = f64::from(step);
            let hi = lo + 1.0;
            assert!(e.score(hi, 5.0, 5.0).unwrap() >= e.score(lo, 5.0, 5.0).unwrap());
            assert!(e.score(5.0, hi, 5.0).unwrap() >= e.score(5.0, lo, 5.0).unwrap());
            assert!(e.score(5.0, 5.0, hi).unwrap() <= e.score(5.0, 5.0, lo).unwrap());
        }
    }

    #[test]
    fn rejects_out_of_range_inputs() {
        let e = engine();
        assert_eq!(
            e.score(11.0, 5.0, 5.0),
            Err(PriorityError::OutOfRange { field: "urgency", value: 11.0 })
        );
        assert!(e.score(5.0, -0.1, 5.0).is_err());
        assert!(e.score(5.0, 5.0, f64::NAN).is_err());
    }

    #[test]
    fn rejects_bad_weights() {
        let neg = PriorityWeights {
            effort: -0.1,
            ..PriorityWeights::default()
        };
        assert!(PriorityEngine::new(neg).is_err());
        let inf = PriorityWeights {
            importance: f64::INFINITY,
            ..PriorityWeights::default()
        };
        assert!(PriorityEngine::new(inf).is_err());
    }

    #[test]
    fn rank_is_deterministic_with_ties() {
        let now = Utc::now();
        let t = |id: &str, imp: f64, age_min: i64| Task {
            id: id.into(),
            title: id.into(),
            urgency: 5.0,
            importance: imp,
            effort: 2.0,
            priority_score: 0.0,
            status: TaskStatus::Pending,
            created_at: now - Duration::minutes(age_min),
        };
        let tasks = vec![t("late", 5.0, 1), t("top", 9.0, 0), t("early", 5.0, 10)];

        let e = engine();
        let first = e.rank(&tasks);
        let mut reversed = tasks.clone();
        reversed.reverse();
        let second = e.rank(&reversed);

        let ids = |v: &[Task]| v.iter().map(|t| t.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), vec!["top", "early", "late"]);
        assert_eq!(ids(&first), ids(&second));
        assert!(first[0].priority_score > first[1].priority_score);
    }
}
