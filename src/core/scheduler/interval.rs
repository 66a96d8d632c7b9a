//! Interval expressions: plain durations (`30s`, `6h`) or exact times of day
//! (`exact:HH:MM[,HH:MM…]`, UTC).
//!
//! Every computed next-run carries uniform random jitter (1..=300 s for
//! duration cadences, 1..=60 s for exact times) so fleets sharing a config
//! do not fire in lockstep.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Timelike, Utc};
use rand::Rng;
use std::time::Duration;

const EXACT_PREFIX: &str = "exact:";

/// Parsed interval expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntervalExpr {
    /// Fixed cadence from the previous run.
    Every(Duration),
    /// One or more exact times of day, UTC.
    Exact(Vec<NaiveTime>),
}

impl IntervalExpr {
    pub fn parse(raw: &str) -> Result<IntervalExpr> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidInput("interval must not be empty".into()));
        }

        if let Some(times) = raw.strip_prefix(EXACT_PREFIX) {
            let mut parsed = Vec::new();
            for part in times.split(',') {
                let part = part.trim();
                let time = NaiveTime::parse_from_str(part, "%H:%M").map_err(|_| {
                    Error::InvalidInput(format!("bad exact time {part:?}, expected HH:MM"))
                })?;
                parsed.push(time);
            }
            if parsed.is_empty() {
                return Err(Error::InvalidInput("exact: needs at least one time".into()));
            }
            parsed.sort();
            parsed.dedup();
            return Ok(IntervalExpr::Exact(parsed));
        }

        let duration = humantime::parse_duration(raw)
            .map_err(|e| Error::InvalidInput(format!("bad interval {raw:?}: {e}")))?;
        if duration < Duration::from_secs(1) {
            return Err(Error::InvalidInput(format!(
                "interval {raw:?} is below the 1 second floor"
            )));
        }
        Ok(IntervalExpr::Every(duration))
    }

    /// The jitter window for this expression kind, in seconds.
    pub fn jitter_bounds(&self) -> std::ops::RangeInclusive<i64> {
        match self {
            IntervalExpr::Every(_) => 1..=300,
            IntervalExpr::Exact(_) => 1..=60,
        }
    }

    /// Next occurrence strictly after `from`, without jitter.
    pub fn next_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            IntervalExpr::Every(duration) => {
                let span = ChronoDuration::from_std(*duration)
                    .unwrap_or_else(|_| ChronoDuration::seconds(60));
                from + span
            }
            IntervalExpr::Exact(times) => {
                let today = from.date_naive();
                // Earliest listed time later today, else the first time
                // tomorrow.
                for time in times {
                    let candidate = Utc
                        .from_utc_datetime(&today.and_time(*time))
                        .with_nanosecond(0)
                        .unwrap_or(from);
                    if candidate > from {
                        return candidate;
                    }
                }
                let tomorrow = today + ChronoDuration::days(1);
                Utc.from_utc_datetime(&tomorrow.and_time(times[0]))
            }
        }
    }

    /// Next occurrence after `from` with jitter applied. This is the value
    /// persisted as `next_run`.
    pub fn next_run(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let bounds = self.jitter_bounds();
        let jitter = rand::thread_rng().gen_range(bounds);
        self.next_after(from) + ChronoDuration::seconds(jitter)
    }
}

impl std::fmt::Display for IntervalExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntervalExpr::Every(duration) => {
                write!(f, "{}", humantime::format_duration(*duration))
            }
            IntervalExpr::Exact(times) => {
                write!(f, "{EXACT_PREFIX}")?;
                for (i, time) in times.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", time.format("%H:%M"))?;
                }
                Ok(())
            }
        }
    }
}
