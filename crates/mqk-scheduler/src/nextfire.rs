//! Deterministic next-fire computation. Every function takes `now` and any
//! clock-dependent state explicitly so scheduling decisions stay pure and
//! reproducible in tests.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::types::{JobDefinition, ScheduleKind, SchedulerError};

/// Initial fire for a newly-registered job: `now + period` for interval jobs
/// (never immediate, to avoid a startup thundering herd), or the next daily
/// slot for daily jobs.
pub fn initial_next_run(def: &JobDefinition, now: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
    match &def.schedule {
        ScheduleKind::Interval { period_ms } => {
            if *period_ms <= 0 {
                return Err(SchedulerError::InvalidInterval);
            }
            Ok(now + chrono::Duration::milliseconds(*period_ms))
        }
        ScheduleKind::Daily { hour, minute, tz } => Ok(next_daily_fire(now, *hour, *minute, *tz)),
    }
}

/// Advance past `now`, given the schedule kind and the previous anchor
/// (the job's own last `next_run_at`, used as the interval anchor).
pub fn advance_next_run(
    def: &JobDefinition,
    anchor: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, SchedulerError> {
    match &def.schedule {
        ScheduleKind::Interval { period_ms } => {
            if *period_ms <= 0 {
                return Err(SchedulerError::InvalidInterval);
            }
            Ok(next_fire_interval(anchor, now, *period_ms))
        }
        ScheduleKind::Daily { hour, minute, tz } => Ok(next_daily_fire(now, *hour, *minute, *tz)),
    }
}

/// `anchor` is the interval's origin; returns the smallest
/// `anchor + k*interval` strictly greater than `now`.
pub fn next_fire_interval(anchor: DateTime<Utc>, now: DateTime<Utc>, interval_ms: i64) -> DateTime<Utc> {
    debug_assert!(interval_ms > 0);
    if anchor > now {
        return anchor;
    }
    let elapsed_ms = (now - anchor).num_milliseconds();
    let k = elapsed_ms / interval_ms + 1;
    anchor + chrono::Duration::milliseconds(k * interval_ms)
}

/// Next occurrence of `hour:minute` in `tz`, strictly after `now`. If today's
/// slot has already passed, advances one calendar day; no DST gap handling
/// beyond what the declared timezone's own arithmetic provides.
pub fn next_daily_fire(now: DateTime<Utc>, hour: u32, minute: u32, tz: Tz) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    let today_slot = tz
        .with_ymd_and_hms(local_now.year(), local_now.month(), local_now.day(), hour, minute, 0)
        .single()
        .unwrap_or_else(|| local_now);
    let candidate = if today_slot <= local_now {
        today_slot + chrono::Duration::days(1)
    } else {
        today_slot
    };
    candidate.with_timezone(&Utc)
}

use chrono::Datelike;
