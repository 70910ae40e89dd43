//! Raw row → `SensorRecord` normalization.
//!
//! Feed versions disagree on how coordinates and occupancy are encoded. Each
//! semantic field is read through an ordered list of small extractors; the
//! first one that yields a value wins and later extractors never overwrite it.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::helpers::{value_as_f64, value_as_id, value_as_timestamp};
use crate::models::SensorRecord;
use crate::services::fields::{first_value, FieldRole};

/// One way a row may carry a coordinate pair.
#[derive(Debug, Clone, Copy)]
pub enum CoordSource {
    /// `{ field: { lat: .., lng: .. } }`
    Nested {
        field: &'static str,
        lat: &'static str,
        lng: &'static str,
    },
    /// Parallel scalar columns at the top level.
    Flat {
        lat: &'static str,
        lng: &'static str,
    },
}

impl CoordSource {
    fn extract(&self, row: &Value) -> (Option<f64>, Option<f64>) {
        let (container, lat_key, lng_key) = match *self {
            CoordSource::Nested { field, lat, lng } => match row.get(field) {
                Some(obj) if obj.is_object() => (obj, lat, lng),
                _ => return (None, None),
            },
            CoordSource::Flat { lat, lng } => (row, lat, lng),
        };
        (
            container.get(lat_key).and_then(value_as_f64),
            container.get(lng_key).and_then(value_as_f64),
        )
    }
}

pub const COORD_SOURCES: &[CoordSource] = &[
    CoordSource::Nested {
        field: "location",
        lat: "lat",
        lng: "lon",
    },
    CoordSource::Nested {
        field: "location",
        lat: "lat",
        lng: "lng",
    },
    CoordSource::Nested {
        field: "geo_point_2d",
        lat: "lat",
        lng: "lon",
    },
    CoordSource::Flat {
        lat: "lat",
        lng: "lon",
    },
    CoordSource::Flat {
        lat: "latitude",
        lng: "longitude",
    },
    CoordSource::Flat {
        lat: "lat",
        lng: "lng",
    },
];

/// Resolve `(lat, lng)`, taking each component from the first source that has it.
pub fn extract_coordinates(row: &Value) -> Option<(f64, f64)> {
    let mut lat: Option<f64> = None;
    let mut lng: Option<f64> = None;
    for source in COORD_SOURCES {
        let (a, b) = source.extract(row);
        lat = lat.or(a);
        lng = lng.or(b);
        if lat.is_some() && lng.is_some() {
            break;
        }
    }
    Some((lat?, lng?))
}

/// What a `true` / `1` means for a boolean-ish status column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    TrueMeansFree,
    TrueMeansOccupied,
}

/// A status column and how to read its boolean form.
#[derive(Debug, Clone, Copy)]
pub struct StatusField {
    pub name: &'static str,
    pub polarity: Polarity,
}

pub const STATUS_FIELDS: &[StatusField] = &[
    StatusField {
        name: "status_description",
        polarity: Polarity::TrueMeansOccupied,
    },
    StatusField {
        name: "status",
        polarity: Polarity::TrueMeansOccupied,
    },
    StatusField {
        name: "occupancy_status",
        polarity: Polarity::TrueMeansOccupied,
    },
    StatusField {
        name: "vehiclepresent",
        polarity: Polarity::TrueMeansOccupied,
    },
    StatusField {
        name: "vehicle_present",
        polarity: Polarity::TrueMeansOccupied,
    },
    StatusField {
        name: "occupied",
        polarity: Polarity::TrueMeansOccupied,
    },
    StatusField {
        name: "is_occupied",
        polarity: Polarity::TrueMeansOccupied,
    },
    StatusField {
        name: "available",
        polarity: Polarity::TrueMeansFree,
    },
    StatusField {
        name: "is_free",
        polarity: Polarity::TrueMeansFree,
    },
];

// Substring matching: "unavailable" contains "available" and "unoccupied"
// contains "occupied", so negated forms are checked before free words, and
// free words before occupied words.
const NEGATED_FREE_WORDS: &[&str] = &["unavailable", "not available", "not free"];
const FREE_WORDS: &[&str] = &["unoccupied", "vacant", "free", "available", "empty"];
const OCCUPIED_WORDS: &[&str] = &["occupied", "present", "taken", "busy", "full", "in use"];

fn from_flag(flag: bool, polarity: Polarity) -> bool {
    match polarity {
        Polarity::TrueMeansFree => flag,
        Polarity::TrueMeansOccupied => !flag,
    }
}

/// Interpret one status value as `Some(true)` = free, `Some(false)` = occupied.
pub fn interpret_status(value: &Value, polarity: Polarity) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(from_flag(*b, polarity)),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(from_flag(false, polarity)),
            Some(1) => Some(from_flag(true, polarity)),
            _ => None,
        },
        Value::String(s) => {
            let s = s.trim().to_lowercase();
            match s.as_str() {
                "true" | "1" | "yes" => return Some(from_flag(true, polarity)),
                "false" | "0" | "no" => return Some(from_flag(false, polarity)),
                _ => {}
            }
            if NEGATED_FREE_WORDS.iter().any(|w| s.contains(w)) {
                Some(false)
            } else if FREE_WORDS.iter().any(|w| s.contains(w)) {
                Some(true)
            } else if OCCUPIED_WORDS.iter().any(|w| s.contains(w)) {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Tri-state availability: the first status column that can be interpreted wins.
pub fn infer_availability(row: &Value) -> Option<bool> {
    STATUS_FIELDS.iter().find_map(|f| {
        row.get(f.name)
            .and_then(|v| interpret_status(v, f.polarity))
    })
}

const CAPACITY_FIELDS: &[&str] = &["capacity", "bay_count", "total_bays", "total_spaces", "spaces"];
const AVAILABLE_COUNT_FIELDS: &[&str] = &["available_spots", "available_bays", "free_spaces"];

fn extract_capacity(row: &Value) -> u32 {
    first_value(row, CAPACITY_FIELDS)
        .and_then(value_as_f64)
        .filter(|v| v.is_finite() && *v >= 1.0)
        .map(|v| v.round() as u32)
        .unwrap_or(1)
}

/// Normalize one raw row. Returns `None` when no coordinates can be resolved.
///
/// `now` stands in for a missing or unparseable update timestamp.
pub fn normalize(row: &Value, now: DateTime<Utc>) -> Option<SensorRecord> {
    let (lat, lng) = extract_coordinates(row)?;
    let capacity = extract_capacity(row);

    let available_spots = match first_value(row, AVAILABLE_COUNT_FIELDS).and_then(value_as_f64) {
        Some(count) if count.is_finite() && count >= 0.0 => Some((count.round() as u32).min(capacity)),
        _ => infer_availability(row).map(|free| if free { capacity } else { 0 }),
    };

    let id = first_value(row, FieldRole::Bay.candidates())
        .or_else(|| first_value(row, FieldRole::Identifier.candidates()))
        .and_then(value_as_id)
        .unwrap_or_else(|| format!("{:.6},{:.6}", lat, lng));

    let updated_at = first_value(row, FieldRole::Timestamp.candidates())
        .and_then(value_as_timestamp)
        .unwrap_or(now);

    Some(SensorRecord {
        id,
        lat,
        lng,
        capacity,
        available_spots,
        updated_at,
    })
}
