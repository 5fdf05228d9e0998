//! Backpressure interpretation.
//!
//! Only 429 and 503 count as backpressure. Their Retry-After header names a
//! wake time either as an HTTP-date or as an integer offset in seconds;
//! anything unreadable means "now", i.e. no delay.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Delay implied by a response, measured from `now`.
pub fn compute_delay(status: u16, retry_after: Option<&str>, now: DateTime<Utc>) -> Duration {
    if !matches!(status, 429 | 503) {
        return Duration::ZERO;
    }
    let Some(value) = retry_after else {
        return Duration::ZERO;
    };
    let wake = resolve_wake_time(value, now);
    (wake - now).to_std().unwrap_or(Duration::ZERO)
}

/// Read a Retry-After value: HTTP-date first, then integer seconds.
fn resolve_wake_time(value: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return date.with_timezone(&Utc);
    }
    match value.trim().parse::<i64>() {
        Ok(seconds) => chrono::Duration::try_seconds(seconds)
            .and_then(|offset| now.checked_add_signed(offset))
            .unwrap_or(now),
        Err(_) => now,
    }
}
