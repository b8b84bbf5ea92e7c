//! Expiry timestamp normalization.
//!
//! Token endpoints report expiries in a handful of shapes. Everything is
//! normalized to `DateTime<Utc>` so the credential store can compare against
//! `Utc::now()` regardless of the host time zone.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::warn;

/// Naive formats accepted in addition to RFC 3339
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Epoch values at or above this are milliseconds rather than seconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Parse a wire expiry into UTC.
///
/// Naive timestamps are read as UTC when `enforce_utc` is set, otherwise as
/// host-local time. Returns `None` when the value cannot be interpreted.
pub fn parse_expiry(raw: &Value, enforce_utc: bool) -> Option<DateTime<Utc>> {
    let parsed = match raw {
        Value::Number(n) => n.as_i64().and_then(from_epoch),
        Value::String(s) => parse_expiry_str(s.trim(), enforce_utc),
        Value::Null => return None,
        _ => None,
    };

    if parsed.is_none() {
        warn!(raw = %raw, "Unrecognized expiry format, storing credential without expiry");
    }
    parsed
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value >= EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

fn parse_expiry_str(s: &str, enforce_utc: bool) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(epoch) = s.parse::<i64>() {
        return from_epoch(epoch);
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;

    if enforce_utc {
        return Some(Utc.from_utc_datetime(&naive));
    }

    // Local wall-clock times in a DST gap have no mapping; use the literal value.
    match Local.from_local_datetime(&naive).earliest() {
        Some(local) => Some(local.with_timezone(&Utc)),
        None => {
            warn!(expiry = s, "Local expiry does not exist in host time zone, reading as UTC");
            Some(Utc.from_utc_datetime(&naive))
        }
    }
}
