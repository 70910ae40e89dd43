//! Hexagonal spatial aggregation and ranking of parking areas.
//!
//! Sensor records are bucketed into H3 cells; cell geometry comes from the
//! cell index alone so aggregation is a pure function of the input records
//! and the resolution.

use chrono::{DateTime, Utc};
use h3o::{CellIndex, Resolution};
use serde::Deserialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::errors::FetchError;
use crate::helpers::{haversine_m, round2};
use crate::models::{AreaCell, LatLng, SensorRecord};

/// Maximum number of contributing sensor ids kept per cell.
const MAX_SAMPLE_IDS: usize = 10;

/// Hex cell containing a point, or `None` for non-finite / out-of-range input.
pub fn cell_of(lat: f64, lng: f64, resolution: Resolution) -> Option<CellIndex> {
    if !lat.is_finite() || !lng.is_finite() {
        return None;
    }
    let ll = h3o::LatLng::new(lat, lng).ok()?;
    Some(ll.to_cell(resolution))
}

/// Parse a client-supplied area id.
pub fn parse_area_id(area_id: &str) -> Result<CellIndex, FetchError> {
    area_id
        .trim()
        .parse::<CellIndex>()
        .map_err(|_| FetchError::InvalidSpatialIdentifier(area_id.to_string()))
}

pub fn cell_center(cell: CellIndex) -> LatLng {
    let ll = h3o::LatLng::from(cell);
    LatLng {
        lat: ll.lat(),
        lng: ll.lng(),
    }
}

pub fn cell_boundary(cell: CellIndex) -> Vec<LatLng> {
    cell.boundary()
        .iter()
        .map(|ll| LatLng {
            lat: ll.lat(),
            lng: ll.lng(),
        })
        .collect()
}

/// Average edge length of cells at this cell's resolution (metres).
pub fn cell_edge_length_m(cell: CellIndex) -> f64 {
    cell.resolution().edge_length_m()
}

/// Smallest radius used when searching around a cell.
const MIN_SEARCH_RADIUS_M: f64 = 150.0;

/// Center and search radius of a cell named by id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellGeometry {
    pub cell: CellIndex,
    pub center: LatLng,
    pub search_radius_m: f64,
}

/// Look up a cell by id. Fails with `InvalidSpatialIdentifier` when malformed.
pub fn cell_geometry(area_id: &str) -> Result<CellGeometry, FetchError> {
    let cell = parse_area_id(area_id)?;
    Ok(CellGeometry {
        cell,
        center: cell_center(cell),
        search_radius_m: cell_edge_length_m(cell).max(MIN_SEARCH_RADIUS_M),
    })
}

#[derive(Debug)]
struct CellAccumulator {
    cell: CellIndex,
    total_bays: u32,
    available_bays: u32,
    updated_at: DateTime<Utc>,
    sample_ids: Vec<String>,
}

impl CellAccumulator {
    fn new(cell: CellIndex, first_seen: DateTime<Utc>) -> Self {
        Self {
            cell,
            total_bays: 0,
            available_bays: 0,
            updated_at: first_seen,
            sample_ids: Vec::new(),
        }
    }

    fn add(&mut self, record: &SensorRecord) {
        self.total_bays = self.total_bays.saturating_add(record.capacity);
        // Unknown availability adds capacity only; it is neither free nor occupied.
        if let Some(free) = record.available_spots {
            self.available_bays = self.available_bays.saturating_add(free.min(record.capacity));
        }
        if record.updated_at > self.updated_at {
            self.updated_at = record.updated_at;
        }
        if self.sample_ids.len() < MAX_SAMPLE_IDS {
            self.sample_ids.push(record.id.clone());
        }
    }

    fn finish(self) -> AreaCell {
        let occupancy_rate = if self.total_bays > 0 {
            round2(1.0 - self.available_bays as f64 / self.total_bays as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        AreaCell {
            area_id: self.cell.to_string(),
            center: cell_center(self.cell),
            boundary: cell_boundary(self.cell),
            total_bays: self.total_bays,
            available_bays: self.available_bays,
            occupancy_rate,
            updated_at: self.updated_at,
            sample_ids: self.sample_ids,
            distance_m: None,
        }
    }
}

/// Aggregate sensor records into hex cells, ordered by area id.
///
/// Records without finite coordinates are skipped.
pub fn aggregate(records: &[SensorRecord], resolution: Resolution) -> Vec<AreaCell> {
    let mut cells: BTreeMap<String, CellAccumulator> = BTreeMap::new();
    let mut skipped = 0usize;

    for record in records {
        let Some(cell) = cell_of(record.lat, record.lng, resolution) else {
            skipped += 1;
            continue;
        };
        cells
            .entry(cell.to_string())
            .or_insert_with(|| CellAccumulator::new(cell, record.updated_at))
            .add(record);
    }

    if skipped > 0 {
        tracing::debug!("Skipped {} records without usable coordinates", skipped);
    }

    cells.into_values().map(CellAccumulator::finish).collect()
}

/// How areas are ordered for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RankStrategy {
    /// Most free bays first; distance breaks near-ties.
    Availability,
    /// Lowest occupancy first; distance counted in 500 m steps.
    Occupancy,
    /// Nearest first.
    Distance,
    /// Weighted blend of free bays, distance and occupancy.
    #[default]
    Mix,
}

impl RankStrategy {
    /// Score a cell; higher is better. `distance_m` is 0 without an origin.
    pub fn score(self, cell: &AreaCell, distance_m: f64) -> f64 {
        let available = cell.available_bays as f64;
        match self {
            RankStrategy::Availability => available - distance_m / 1000.0,
            RankStrategy::Occupancy => {
                100.0 * (1.0 - cell.occupancy_rate) - (distance_m / 500.0).floor()
            }
            RankStrategy::Distance => -distance_m,
            RankStrategy::Mix => 2.0 * available - distance_m / 30.0 - 10.0 * cell.occupancy_rate,
        }
    }
}

/// Sort cells by descending score. Ties keep their input order.
pub fn rank(cells: Vec<AreaCell>, origin: Option<LatLng>, strategy: RankStrategy) -> Vec<AreaCell> {
    let mut scored: Vec<(f64, AreaCell)> = cells
        .into_iter()
        .map(|mut cell| {
            cell.distance_m = origin
                .map(|o| haversine_m(o.lat, o.lng, cell.center.lat, cell.center.lng).round());
            let score = strategy.score(&cell, cell.distance_m.unwrap_or(0.0));
            (score, cell)
        })
        .collect();

    // `sort_by` is stable, so equal scores keep input order.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(_, cell)| cell).collect()
}
