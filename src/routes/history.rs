//! Historical occupancy endpoint.
//!
//! - GET /api/v1/history?lat&lng&radius&start&end

use axum::extract::{Query, State};
use axum::Json;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::errors::{AppError, ErrorResponse};
use crate::helpers::parse_timestamp;
use crate::models::{HistoryTier, HourlyBucket, LatLng};
use crate::routes::{parse_origin, AppState, DEFAULT_RADIUS_M, MAX_RADIUS_M};
use crate::services::history::{fetch_annual_hourly_by_radius, HistoryWindow};

/// Longest window a single request may cover.
const MAX_WINDOW_DAYS: i64 = 62;

#[derive(Debug, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// Latitude of the search center
    pub lat: f64,
    /// Longitude of the search center
    pub lng: f64,
    /// Search radius in metres (default 500, max 5000)
    pub radius: Option<f64>,
    /// Window start in ISO 8601 (defaults to the configured history window)
    pub start: Option<String>,
    /// Window end in ISO 8601
    pub end: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    pub origin: LatLng,
    pub radius_m: f64,
    pub window: HistoryWindow,
    pub tier: HistoryTier,
    pub capacity: u32,
    pub series: Vec<HourlyBucket>,
}

fn parse_window(
    start: Option<&str>,
    end: Option<&str>,
    default: HistoryWindow,
) -> Result<HistoryWindow, AppError> {
    let parse = |raw: &str| {
        parse_timestamp(raw).ok_or_else(|| AppError::BadRequest(format!("Invalid datetime: {}", raw)))
    };

    let window = match (start, end) {
        (None, None) => default,
        (Some(s), Some(e)) => HistoryWindow {
            start: parse(s)?,
            end: parse(e)?,
        },
        _ => {
            return Err(AppError::BadRequest(
                "start and end must be given together".to_string(),
            ))
        }
    };

    if window.end <= window.start {
        return Err(AppError::BadRequest("end must be after start".to_string()));
    }
    if window.end - window.start > Duration::days(MAX_WINDOW_DAYS) {
        return Err(AppError::BadRequest(format!(
            "window must not exceed {} days",
            MAX_WINDOW_DAYS
        )));
    }
    Ok(window)
}

/// Hourly occupancy around a point, from the best available historical tier.
///
/// Never empty: when no real data is available the series is synthetic and
/// `tier` says so.
#[utoipa::path(
    get,
    path = "/api/v1/history",
    tag = "History",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Hourly historical series", body = HistoryResponse),
        (status = 400, description = "Invalid parameters", body = ErrorResponse),
    )
)]
pub async fn get_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let origin = parse_origin(Some(params.lat), Some(params.lng))?
        .ok_or_else(|| AppError::BadRequest("lat and lng are required".to_string()))?;
    let radius_m = params.radius.unwrap_or(DEFAULT_RADIUS_M);
    if !radius_m.is_finite() || radius_m <= 0.0 || radius_m > MAX_RADIUS_M {
        return Err(AppError::BadRequest(format!(
            "radius must be between 0 and {} metres",
            MAX_RADIUS_M
        )));
    }

    let now = Utc::now();
    let config = &state.config;
    let default_window =
        HistoryWindow::aligned_to_year(now, config.history_year, config.history_window_days);
    let window = parse_window(params.start.as_deref(), params.end.as_deref(), default_window)?;

    let result = fetch_annual_hourly_by_radius(
        &state.client,
        config,
        origin,
        radius_m,
        window,
        &config.datasets.annual_events,
        now,
    )
    .await;

    Ok(Json(HistoryResponse {
        origin,
        radius_m,
        window,
        tier: result.tier,
        capacity: result.capacity,
        series: result.series,
    }))
}
