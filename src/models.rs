//! Value objects flowing through the pipeline.
//!
//! All of these are computed fresh per request and never persisted; the only
//! long-lived state is the time-series store in `services::timeseries`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// One normalized on-street sensor (or sensor group) reading.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SensorRecord {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    /// Number of bays this record covers (always ≥ 1).
    pub capacity: u32,
    /// Free bays, or `None` when the feed does not say. Never coerced to zero.
    pub available_spots: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

/// Occupancy of one entity during one UTC hour.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HourlyBucket {
    /// Hour-aligned UTC timestamp.
    pub ts: DateTime<Utc>,
    pub free: u32,
    pub occ: u32,
    pub total: u32,
}

impl HourlyBucket {
    /// Fraction of `total` that is free, or `None` when capacity is unknown.
    pub fn free_ratio(&self) -> Option<f64> {
        (self.total > 0).then(|| (self.free as f64 / self.total as f64).clamp(0.0, 1.0))
    }
}

/// Aggregated occupancy for one hexagonal cell.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AreaCell {
    /// Hex cell id (H3 index in hexadecimal form).
    pub area_id: String,
    pub center: LatLng,
    /// Cell boundary vertices, in order.
    pub boundary: Vec<LatLng>,
    pub total_bays: u32,
    pub available_bays: u32,
    /// `1 - available/total` rounded to 2 dp, or 0 when `total_bays` is 0.
    pub occupancy_rate: f64,
    pub updated_at: DateTime<Utc>,
    /// Up to 10 contributing sensor ids.
    pub sample_ids: Vec<String>,
    /// Great-circle distance from the ranking origin, set by ranking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
}

/// Free-ratio statistics for one hour-of-day slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct HodSlot {
    pub mean: f64,
    pub p10: f64,
    pub p90: f64,
}

/// Per hour-of-day (UTC) free-ratio profile.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HodProfile {
    /// Always 24 entries, indexed by UTC hour.
    pub slots: Vec<HodSlot>,
}

/// One projected hour.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ForecastPoint {
    pub ts: DateTime<Utc>,
    pub expected_available: u32,
    pub lo80: u32,
    pub hi80: u32,
    pub free_ratio: f64,
}

/// Which historical tier produced a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HistoryTier {
    EventOverlap,
    PedestrianProxy,
    Synthetic,
}

/// Output of the historical aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HistoricalSeries {
    pub capacity: u32,
    /// Sorted by `ts` ascending.
    pub series: Vec<HourlyBucket>,
    pub tier: HistoryTier,
}

impl HistoricalSeries {
    /// A series is usable when it has at least one bucket and known capacity.
    pub fn is_usable(&self) -> bool {
        self.capacity > 0 && !self.series.is_empty()
    }
}
