//! Time decomposition and the size/time rotation predicate.
//!
//! Two related but distinct notions of "time difference" show up here. [`diff_seconds`] is the
//! general-purpose `(days, hours, minutes, seconds)` decomposition of a gap between two
//! second-precision UNIX timestamps — useful on its own (diagnostics, tests) and independent of
//! any particular log's bookkeeping. [`RotationPolicy::needs_rotation`] works in millisecond
//! timestamps (what [`crate::LogState`] actually stores) and answers one narrower question: has
//! this log crossed a rotation boundary. The two are not the same function because the original
//! implementation's single `get_diff` helper was fed both units inconsistently; this rewrite keeps
//! the tested seconds-based decomposition intact and gives rotation its own millisecond-correct path.

use chrono::{DateTime, Utc};

pub const MAX_SIZE: u64 = 50 * 1024 * 1024;
pub const MAX_AGE_HOURS: i64 = 3;
pub const MAX_COLLISION_SUFFIX: u32 = 10;

/// Current wall-clock time in milliseconds since the UNIX epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Decomposes `b - a` (both UNIX timestamps in seconds) into `(days, hours, minutes, seconds)`.
///
/// A negative `days` encodes a past `b` relative to `a`; the remaining components are always
/// normalized to their usual non-negative ranges, matching `timedelta`'s own normalization.
pub fn diff_seconds(a: i64, b: i64) -> (i64, i64, i64, i64) {
    let total = b - a;
    let days = total.div_euclid(86_400);
    let rem = total.rem_euclid(86_400);
    let hours = rem / 3600;
    let minutes = (rem % 3600) / 60;
    let seconds = rem % 60;
    (days, hours, minutes, seconds)
}

/// True iff the two millisecond UNIX timestamps fall on the same UTC calendar date.
pub fn is_same_utc_day_ms(a_ms: i64, b_ms: i64) -> bool {
    match (ms_to_datetime(a_ms), ms_to_datetime(b_ms)) {
        (Some(a), Some(b)) => a.date_naive() == b.date_naive(),
        // An unparseable timestamp can't be proven same-day; treat as different days so
        // rotation errs on the side of starting a fresh file rather than growing one forever.
        _ => false,
    }
}

/// Whole hours between two millisecond UNIX timestamps (always non-negative).
pub fn hours_between_ms(a_ms: i64, b_ms: i64) -> i64 {
    (a_ms - b_ms).abs() / 3_600_000
}

fn ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// Extracts the leading integer timestamp token from a formatted log line, e.g. the `"<ts> "`
/// prefix `put_data` adds, or the numeric token a syslog-formatted line starts with.
pub fn parse_leading_timestamp(line: &str) -> Option<i64> {
    line.split_whitespace().next()?.parse::<i64>().ok()
}

/// Snapshot of a log's staging-file bookkeeping, as `needs_rotation` sees it. Mirrors the
/// fields of [`crate::LogState`] that the rotation decision actually depends on, so the policy
/// can be unit tested without constructing a full state map entry.
#[derive(Debug, Clone, Copy)]
pub struct RotationInput {
    pub size: u64,
    pub first_msg_ts: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RotationPolicy {
    pub max_size: u64,
    pub max_age_hours: i64,
}

impl RotationPolicy {
    pub fn new() -> Self {
        Self {
            max_size: MAX_SIZE,
            max_age_hours: MAX_AGE_HOURS,
        }
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_max_age_hours(mut self, max_age_hours: i64) -> Self {
        self.max_age_hours = max_age_hours;
        self
    }

    /// Decides whether a log with `state` bookkeeping needs to rotate before absorbing an
    /// incoming chunk of `incoming_size` bytes timestamped at `incoming_ts_ms`.
    pub fn needs_rotation(&self, state: RotationInput, incoming_size: u64, incoming_ts_ms: i64) -> bool {
        if state.size + incoming_size > self.max_size {
            return true;
        }

        let Some(first_ts) = state.first_msg_ts else {
            return false;
        };

        if !is_same_utc_day_ms(first_ts, incoming_ts_ms) {
            return true;
        }

        hours_between_ms(first_ts, incoming_ts_ms) >= self.max_age_hours
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_seconds_same_instant() {
        assert_eq!(diff_seconds(1_419_249_757, 1_419_249_757), (0, 0, 0, 0));
    }

    #[test]
    fn diff_seconds_one_second() {
        assert_eq!(diff_seconds(1_419_249_757, 1_419_249_758), (0, 0, 0, 1));
    }

    #[test]
    fn diff_seconds_one_minute_one_second() {
        assert_eq!(diff_seconds(1_419_249_757, 1_419_249_818), (0, 0, 1, 1));
    }

    #[test]
    fn diff_seconds_one_hour_one_minute_one_second() {
        assert_eq!(diff_seconds(1_419_249_757, 1_419_253_418), (0, 1, 1, 1));
    }

    #[test]
    fn diff_seconds_one_day_one_hour_one_minute_one_second() {
        assert_eq!(diff_seconds(1_419_249_757, 1_419_339_818), (1, 1, 1, 1));
    }

    #[test]
    fn diff_seconds_negative_wraps_like_timedelta() {
        assert_eq!(diff_seconds(1_419_249_757, 1_419_249_697), (-1, 23, 59, 0));
    }

    #[test]
    fn rotation_boundary_on_size() {
        let policy = RotationPolicy::new();
        let state = RotationInput {
            size: 0,
            first_msg_ts: Some(0),
        };
        assert!(!policy.needs_rotation(state, MAX_SIZE, 0));
        assert!(policy.needs_rotation(state, MAX_SIZE + 1, 0));
    }

    #[test]
    fn rotation_boundary_on_age() {
        let policy = RotationPolicy::new();
        let state = RotationInput {
            size: 0,
            first_msg_ts: Some(1_419_249_757_000),
        };
        assert!(!policy.needs_rotation(state, 0, 1_419_249_757_000));
        assert!(policy.needs_rotation(state, 0, 1_419_260_557_000));
    }

    #[test]
    fn rotation_triggers_on_calendar_day_rollover() {
        let policy = RotationPolicy::new();
        // Fri 23:59:59 UTC
        let state = RotationInput {
            size: 0,
            first_msg_ts: Some(1_419_638_399_000),
        };
        // Sat 00:00:00 UTC, one second later, but a different calendar day.
        assert!(policy.needs_rotation(state, 0, 1_419_638_400_000));
    }

    #[test]
    fn rotation_not_needed_without_prior_first_ts() {
        let policy = RotationPolicy::new();
        let state = RotationInput {
            size: 10,
            first_msg_ts: None,
        };
        assert!(!policy.needs_rotation(state, 10, now_ms()));
    }
}
