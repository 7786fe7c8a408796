//! `Retry-After` header parsing
//!
//! The header carries either delta-seconds (`120`) or an HTTP-date
//! (`Wed, 21 Oct 2015 07:28:00 GMT`). Dates in the past mean "now".

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};

/// Parse one `Retry-After` value relative to `now`
///
/// Returns `None` when the value is neither form.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Wait suggested by a response's headers, zero when absent or unparseable
pub fn suggested_wait(headers: &HeaderMap, now: DateTime<Utc>) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let parsed = parse_retry_after(value, now);
            if parsed.is_none() {
                tracing::debug!("Ignoring unparseable Retry-After header: {:?}", value);
            }
            parsed
        })
        .unwrap_or(Duration::ZERO)
}
