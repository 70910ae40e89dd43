//! Area (hex cell) endpoint.
//!
//! - GET /api/v1/areas?lat&lng&radius | bbox &resolution&strategy&limit
//!
//! Every successful call also records one snapshot per returned cell into
//! the time-series store, which later backs `source=live` forecasts.

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use h3o::Resolution;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::errors::{AppError, ErrorResponse};
use crate::models::AreaCell;
use crate::routes::sensors::NO_SENSORS_MESSAGE;
use crate::routes::{parse_origin, parse_spatial_filter, AppState};
use crate::services::areas::{aggregate, rank, RankStrategy};
use crate::services::sensors::fetch_live_sensors;

/// Upstream rows read per area view.
const AREA_SENSOR_LIMIT: usize = 2000;
const DEFAULT_AREA_LIMIT: usize = 50;

#[derive(Debug, Deserialize, IntoParams)]
pub struct AreasQuery {
    /// Latitude of the search center (also the ranking origin)
    pub lat: Option<f64>,
    /// Longitude of the search center (also the ranking origin)
    pub lng: Option<f64>,
    /// Search radius in metres (default 500, max 5000)
    pub radius: Option<f64>,
    /// Bounding box `minLng,minLat,maxLng,maxLat`; takes precedence over lat/lng
    pub bbox: Option<String>,
    /// Hex resolution 0–15 (default 9)
    pub resolution: Option<u8>,
    /// Ranking: availability, occupancy, distance or mix (default)
    pub strategy: Option<RankStrategy>,
    /// Maximum number of areas returned (default 50)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AreasResponse {
    pub resolution: u8,
    pub count: usize,
    pub areas: Vec<AreaCell>,
    /// Set when no sensors were found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Live sensors aggregated into ranked hex cells.
#[utoipa::path(
    get,
    path = "/api/v1/areas",
    tag = "Areas",
    params(AreasQuery),
    responses(
        (status = 200, description = "Ranked areas", body = AreasResponse),
        (status = 400, description = "Invalid location or resolution", body = ErrorResponse),
        (status = 502, description = "Open-data portal unreachable", body = ErrorResponse),
    )
)]
pub async fn list_areas(
    State(state): State<AppState>,
    Query(params): Query<AreasQuery>,
) -> Result<Json<AreasResponse>, AppError> {
    let resolution_level = params.resolution.unwrap_or(state.config.default_resolution);
    let resolution = Resolution::try_from(resolution_level)
        .map_err(|_| AppError::BadRequest(format!("resolution must be 0-15, got {}", resolution_level)))?;
    let origin = parse_origin(params.lat, params.lng)?;
    let filter = parse_spatial_filter(origin, params.radius, params.bbox.as_deref())?;
    let limit = params.limit.unwrap_or(DEFAULT_AREA_LIMIT).max(1);
    let now = Utc::now();

    let sensors = fetch_live_sensors(&state.client, &state.config, &filter, AREA_SENSOR_LIMIT, now).await?;
    if sensors.is_empty() {
        return Ok(Json(AreasResponse {
            resolution: resolution_level,
            count: 0,
            areas: Vec::new(),
            message: Some(NO_SENSORS_MESSAGE.to_string()),
        }));
    }

    let cells = aggregate(&sensors, resolution);
    state.store.record_snapshot(&cells, now).await;

    let mut areas = rank(cells, origin, params.strategy.unwrap_or_default());
    areas.truncate(limit);
    tracing::debug!(
        "{} sensors → {} areas at resolution {}",
        sensors.len(),
        areas.len(),
        resolution_level
    );

    Ok(Json(AreasResponse {
        resolution: resolution_level,
        count: areas.len(),
        areas,
        message: None,
    }))
}
