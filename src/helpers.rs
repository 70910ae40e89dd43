//! Shared helpers for time alignment, distances and loosely-typed JSON values.
//!
//! Upstream rows are untyped `serde_json::Value` objects whose scalars may be
//! numbers, numeric strings or booleans depending on the feed version, so the
//! coercions here are lenient and return `None` instead of failing.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use serde_json::Value;

/// Mean Earth radius used for great-circle distances (metres).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Floor a datetime to the start of its hour.
pub(crate) fn floor_to_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive()
        .and_hms_opt(dt.time().hour(), 0, 0)
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(dt)
}

/// ISO key of the hour containing `dt`, e.g. `2024-01-01T10:00:00Z`.
///
/// Lexicographic order of these keys equals chronological order.
pub(crate) fn hour_key(dt: DateTime<Utc>) -> String {
    floor_to_hour(dt).format("%Y-%m-%dT%H:00:00Z").to_string()
}

/// Every hour-aligned timestamp in `[floor(start), end]`.
pub(crate) fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let mut hours = Vec::new();
    let mut current = floor_to_hour(start);
    while current <= end {
        hours.push(current);
        current += Duration::hours(1);
    }
    hours
}

/// Hour of day (0–23) of a UTC timestamp on a clock `utc_offset_hours` ahead of UTC.
pub(crate) fn local_hour(dt: DateTime<Utc>, utc_offset_hours: i32) -> usize {
    (dt.hour() as i32 + utc_offset_hours).rem_euclid(24) as usize
}

/// Parse the timestamp shapes seen across feed versions.
///
/// Accepts RFC 3339 (with or without seconds), and naive ISO or
/// space-separated forms which are taken as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M%:z") {
        return Some(dt.with_timezone(&Utc));
    }

    let trimmed = s.trim_end_matches('Z');
    let naive_formats = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in &naive_formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    None
}

/// Great-circle distance between two WGS84 points, in metres.
pub(crate) fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

/// Round to 2 decimal places.
pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Read a JSON scalar as `f64`: numbers directly, strings when they parse.
pub(crate) fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Read a JSON scalar as an identifier string. Numbers are stringified.
pub(crate) fn value_as_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Read a JSON scalar as a timestamp.
pub(crate) fn value_as_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => parse_timestamp(s),
        _ => None,
    }
}
