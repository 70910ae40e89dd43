//! Forecast HTTP endpoint.
//!
//! - GET /api/v1/forecast?area_id=..&hours=N&source=history|live|auto
//! - GET /api/v1/forecast?lat=..&lng=..&hours=N&source=history|live|auto

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::errors::{AppError, ErrorResponse};
use crate::routes::{parse_origin, AppState};
use crate::services::forecast::{
    forecast_for, AreaForecast, ForecastSource, ForecastTarget, MAX_FORECAST_HOURS,
};

const DEFAULT_FORECAST_HOURS: u32 = 24;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ForecastQuery {
    /// Hex cell id; takes precedence over lat/lng
    pub area_id: Option<String>,
    /// Latitude, mapped to a cell at the default resolution
    pub lat: Option<f64>,
    /// Longitude, mapped to a cell at the default resolution
    pub lng: Option<f64>,
    /// Hours to project (1–168, default 24)
    pub hours: Option<u32>,
    /// Profile source: history, live or auto (default)
    pub source: Option<ForecastSource>,
}

fn parse_target(params: &ForecastQuery) -> Result<ForecastTarget, AppError> {
    if let Some(area_id) = params.area_id.as_deref().filter(|a| !a.trim().is_empty()) {
        return Ok(ForecastTarget::Area(area_id.trim().to_string()));
    }
    parse_origin(params.lat, params.lng)?
        .map(ForecastTarget::Coords)
        .ok_or_else(|| AppError::BadRequest("Either area_id or lat and lng are required".to_string()))
}

/// Occupancy forecast for an area.
///
/// The response names the source and historical tier actually used, which
/// may differ from the requested source when data is missing.
#[utoipa::path(
    get,
    path = "/api/v1/forecast",
    tag = "Forecasts",
    params(ForecastQuery),
    responses(
        (status = 200, description = "Hourly availability forecast", body = AreaForecast),
        (status = 400, description = "Invalid area id or parameters", body = ErrorResponse),
    )
)]
pub async fn get_forecast(
    State(state): State<AppState>,
    Query(params): Query<ForecastQuery>,
) -> Result<Json<AreaForecast>, AppError> {
    let hours = params.hours.unwrap_or(DEFAULT_FORECAST_HOURS);
    if hours == 0 || hours > MAX_FORECAST_HOURS {
        return Err(AppError::BadRequest(format!(
            "hours must be between 1 and {}",
            MAX_FORECAST_HOURS
        )));
    }
    let target = parse_target(&params)?;

    let result = forecast_for(
        &state.client,
        &state.config,
        &state.store,
        &target,
        hours,
        params.source.unwrap_or_default(),
        Utc::now(),
    )
    .await?;

    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn params(area_id: Option<&str>, lat: Option<f64>, lng: Option<f64>) -> ForecastQuery {
        ForecastQuery {
            area_id: area_id.map(str::to_string),
            lat,
            lng,
            hours: None,
            source: None,
        }
    }

    #[test]
    fn test_parse_target_prefers_area_id() {
        let target = parse_target(&params(Some(" 89be63 "), Some(-37.8), Some(144.9))).unwrap();
        assert_eq!(target, ForecastTarget::Area("89be63".to_string()));
    }

    #[test]
    fn test_parse_target_from_coordinates() {
        assert!(matches!(
            parse_target(&params(Some(""), Some(-37.8), Some(144.9))).unwrap(),
            ForecastTarget::Coords(_)
        ));
        assert!(parse_target(&params(None, None, None)).is_err());
    }

    #[tokio::test]
    async fn test_get_forecast_bad_area_id_is_client_error() {
        let state = AppState::new(AppConfig::for_base_url("http://127.0.0.1:9"));
        let err = get_forecast(State(state), Query(params(Some("zzz"), None, None)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_get_forecast_rejects_hours_out_of_range() {
        let state = AppState::new(AppConfig::for_base_url("http://127.0.0.1:9"));
        let mut p = params(None, Some(-37.8), Some(144.9));
        p.hours = Some(0);
        let err = get_forecast(State(state), Query(p)).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_get_forecast_live_source_uses_recorded_snapshots() {
        let state = AppState::new(AppConfig::for_base_url("http://127.0.0.1:9"));
        let now = Utc::now();
        let area_id = {
            let res = h3o::Resolution::try_from(state.config.default_resolution).unwrap();
            crate::services::areas::cell_of(-37.8136, 144.9631, res)
                .unwrap()
                .to_string()
        };
        state
            .store
            .record(
                &area_id,
                crate::models::HourlyBucket {
                    ts: now,
                    free: 3,
                    occ: 3,
                    total: 6,
                },
                now,
            )
            .await;

        let mut p = params(Some(&area_id), None, None);
        p.hours = Some(5);
        p.source = Some(ForecastSource::Live);
        let Json(body) = get_forecast(State(state), Query(p)).await.unwrap();

        assert_eq!(body.area_id, area_id);
        assert_eq!(body.source, ForecastSource::Live);
        assert_eq!(body.capacity, 6);
        assert_eq!(body.points.len(), 5);
    }
}
