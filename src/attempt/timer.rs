// src/attempt/timer.rs

//! Remaining-time arithmetic. Always derived from the stored `started_at`,
//! never from a client-held countdown, so reloading cannot add time.

use chrono::{DateTime, Duration, Utc};

/// `duration * 60 - (now - started_at)`, clamped to `[0, duration * 60]`.
pub fn remaining_seconds(started_at: DateTime<Utc>, duration_minutes: i32, now: DateTime<Utc>) -> i64 {
    let total = i64::from(duration_minutes) * 60;
    let elapsed = (now - started_at).num_seconds();
    (total - elapsed).clamp(0, total.max(0))
}

pub fn is_expired(started_at: DateTime<Utc>, duration_minutes: i32, now: DateTime<Utc>) -> bool {
    remaining_seconds(started_at, duration_minutes, now) == 0
}

pub fn deadline(started_at: DateTime<Utc>, duration_minutes: i32) -> DateTime<Utc> {
    started_at + Duration::minutes(i64::from(duration_minutes))
}
