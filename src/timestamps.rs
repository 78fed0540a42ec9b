//! Epoch conversion helpers.
//!
//! The artifacts mix three clock units: unix seconds (cache metadata),
//! unix microseconds / PRTime (places, storage metadata) and JavaScript
//! milliseconds (structured clone dates, download end times).

use chrono::{DateTime, Utc};

use crate::error::{FoxtrailError, Result};

/// Unix seconds (u32, as stored in cache index and entry metadata).
pub fn from_unix_seconds(seconds: u32) -> DateTime<Utc> {
    // u32 seconds are always within chrono's representable range
    DateTime::from_timestamp(i64::from(seconds), 0).expect("u32 seconds in range")
}

/// Unix microseconds (PRTime, as stored in places and `.metadata-v2`).
pub fn from_unix_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| FoxtrailError::InvalidFormat(format!("timestamp out of range: {micros}us")))
}

/// Unix milliseconds as stored in download metadata.
pub fn from_unix_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| FoxtrailError::InvalidFormat(format!("timestamp out of range: {millis}ms")))
}

/// JavaScript milliseconds-since-epoch double (dates in structured clone
/// streams and IndexedDB keys). Sub-millisecond fractions are kept.
pub fn from_js_millis(millis: f64) -> Result<DateTime<Utc>> {
    if !millis.is_finite() {
        return Err(FoxtrailError::InvalidFormat(format!(
            "non-finite millisecond timestamp: {millis}"
        )));
    }
    let micros = millis * 1000.0;
    if micros < i64::MIN as f64 || micros > i64::MAX as f64 {
        return Err(FoxtrailError::InvalidFormat(format!(
            "timestamp out of range: {millis}ms"
        )));
    }
    from_unix_micros(micros as i64)
}

/// A `DateTime` rendered back to unix microseconds, for SQL parameters.
pub fn to_unix_micros(when: &DateTime<Utc>) -> i64 {
    when.timestamp_micros()
}
