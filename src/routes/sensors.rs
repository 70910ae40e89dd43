//! Live sensor endpoint.
//!
//! - GET /api/v1/sensors?lat&lng&radius | bbox &limit

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::errors::{AppError, ErrorResponse};
use crate::models::SensorRecord;
use crate::routes::{parse_origin, parse_spatial_filter, AppState};
use crate::services::opendata::MAX_ROWS_PER_FETCH;
use crate::services::sensors::fetch_live_sensors;

const DEFAULT_SENSOR_LIMIT: usize = 500;

/// Message returned alongside an empty result.
pub(crate) const NO_SENSORS_MESSAGE: &str = "no sensors found nearby";

#[derive(Debug, Deserialize, IntoParams)]
pub struct SensorsQuery {
    /// Latitude of the search center
    pub lat: Option<f64>,
    /// Longitude of the search center
    pub lng: Option<f64>,
    /// Search radius in metres (default 500, max 5000)
    pub radius: Option<f64>,
    /// Bounding box `minLng,minLat,maxLng,maxLat`; takes precedence over lat/lng
    pub bbox: Option<String>,
    /// Maximum number of upstream rows to read (default 500, max 10000)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SensorsResponse {
    pub count: usize,
    pub sensors: Vec<SensorRecord>,
    /// Set when no sensors were found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Normalized live sensors around a point or inside a bounding box.
#[utoipa::path(
    get,
    path = "/api/v1/sensors",
    tag = "Sensors",
    params(SensorsQuery),
    responses(
        (status = 200, description = "Live sensors in the area", body = SensorsResponse),
        (status = 400, description = "Invalid location parameters", body = ErrorResponse),
        (status = 502, description = "Open-data portal unreachable", body = ErrorResponse),
    )
)]
pub async fn list_sensors(
    State(state): State<AppState>,
    Query(params): Query<SensorsQuery>,
) -> Result<Json<SensorsResponse>, AppError> {
    let origin = parse_origin(params.lat, params.lng)?;
    let filter = parse_spatial_filter(origin, params.radius, params.bbox.as_deref())?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SENSOR_LIMIT)
        .clamp(1, MAX_ROWS_PER_FETCH);

    let sensors = fetch_live_sensors(&state.client, &state.config, &filter, limit, Utc::now()).await?;

    Ok(Json(SensorsResponse {
        count: sensors.len(),
        message: sensors.is_empty().then(|| NO_SENSORS_MESSAGE.to_string()),
        sensors,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn query(lat: Option<f64>, lng: Option<f64>) -> SensorsQuery {
        SensorsQuery {
            lat,
            lng,
            radius: None,
            bbox: None,
            limit: None,
        }
    }

    #[tokio::test]
    async fn test_list_sensors_empty_has_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/catalog/datasets/bays/records"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "total_count": 0, "results": [] })),
            )
            .mount(&server)
            .await;

        let state = AppState::new(AppConfig::for_base_url(&server.uri()));
        let Json(body) = list_sensors(State(state), Query(query(Some(-37.81), Some(144.96))))
            .await
            .unwrap();
        assert_eq!(body.count, 0);
        assert_eq!(body.message.as_deref(), Some(NO_SENSORS_MESSAGE));
    }

    #[tokio::test]
    async fn test_list_sensors_requires_location() {
        let state = AppState::new(AppConfig::for_base_url("http://127.0.0.1:9"));
        let err = list_sensors(State(state), Query(query(None, None)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
