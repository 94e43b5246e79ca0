//! When a scheduled event is due.
//!
//! Fire-once-per-period: however many periods were missed while the process
//! was down, a due event fires once and its `last_fired_at` moves to now.

use std::fmt;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Once a day at `hour:minute` in the scheduler's UTC offset.
    Daily { hour: u8, minute: u8 },
    /// Every `every_secs` seconds.
    Interval { every_secs: u64 },
}

impl Trigger {
    pub fn daily(hour: u8, minute: u8) -> Result<Self, String> {
        if hour > 23 || minute > 59 {
            return Err(format!("invalid time of day {hour:02}:{minute:02}"));
        }
        Ok(Trigger::Daily { hour, minute })
    }

    pub fn interval(every_secs: u64) -> Result<Self, String> {
        if every_secs == 0 {
            return Err("interval must be at least 1 second".to_string());
        }
        Ok(Trigger::Interval { every_secs })
    }

    /// Parse `"HH:MM"`.
    pub fn parse_daily(s: &str) -> Result<Self, String> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("expected HH:MM, got '{s}'"))?;
        let hour: u8 = h.parse().map_err(|_| format!("bad hour in '{s}'"))?;
        let minute: u8 = m.parse().map_err(|_| format!("bad minute in '{s}'"))?;
        Self::daily(hour, minute)
    }

    /// Start of the daily period containing `now`: the latest `HH:MM` at or
    /// before it.  `None` for interval triggers.
    pub fn anchor(&self, now: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
        let Trigger::Daily { hour, minute } = *self else {
            return None;
        };
        let slot = todays_slot(now, offset, hour, minute)?;
        Some(if slot > now { slot - Duration::days(1) } else { slot })
    }

    pub fn is_due(
        &self,
        now: DateTime<Utc>,
        last_fired_at: Option<DateTime<Utc>>,
        offset: FixedOffset,
    ) -> bool {
        match *self {
            Trigger::Interval { every_secs } => match last_fired_at {
                None => true,
                Some(last) => {
                    let every = i64::try_from(every_secs).unwrap_or(i64::MAX);
                    (now - last).num_seconds() >= every
                }
            },
            Trigger::Daily { hour, minute } => match last_fired_at {
                None => todays_slot(now, offset, hour, minute).is_some_and(|slot| now >= slot),
                Some(last) => self.anchor(now, offset).is_some_and(|anchor| last < anchor),
            },
        }
    }
}

/// Today's `hour:minute` in `offset`, as a UTC instant.
fn todays_slot(
    now: DateTime<Utc>,
    offset: FixedOffset,
    hour: u8,
    minute: u8,
) -> Option<DateTime<Utc>> {
    let local_date = now.with_timezone(&offset).date_naive();
    let time = NaiveTime::from_hms_opt(u32::from(hour), u32::from(minute), 0)?;
    offset
        .from_local_datetime(&local_date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Daily { hour, minute } => write!(f, "daily at {hour:02}:{minute:02}"),
            Trigger::Interval { every_secs } => write!(f, "every {every_secs}s"),
        }
    }
}
