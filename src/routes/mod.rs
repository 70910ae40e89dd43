pub mod areas;
pub mod forecasts;
pub mod health;
pub mod history;
pub mod sensors;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::models::LatLng;
use crate::services::opendata::{BoundingBox, OpenDataClient, SpatialFilter};
use crate::services::timeseries::TimeSeriesStore;

/// Search radius when a request gives a point but no radius (metres).
pub(crate) const DEFAULT_RADIUS_M: f64 = 500.0;
/// Largest search radius a request may ask for (metres).
pub(crate) const MAX_RADIUS_M: f64 = 5000.0;

/// Shared application state for all endpoints.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) client: OpenDataClient,
    pub(crate) config: Arc<AppConfig>,
    pub(crate) store: TimeSeriesStore,
}

impl AppState {
    pub(crate) fn new(config: AppConfig) -> Self {
        Self {
            client: OpenDataClient::new(&config.open_data_base_url, &config.user_agent),
            store: TimeSeriesStore::new(config.ts_retention_days),
            config: Arc::new(config),
        }
    }
}

/// Validate an optional `lat`/`lng` pair. Both or neither must be given.
pub(crate) fn parse_origin(lat: Option<f64>, lng: Option<f64>) -> Result<Option<LatLng>, AppError> {
    match (lat, lng) {
        (None, None) => Ok(None),
        (Some(lat), Some(lng)) => {
            if !lat.is_finite() || !lng.is_finite() || lat.abs() > 90.0 || lng.abs() > 180.0 {
                return Err(AppError::BadRequest(format!(
                    "Invalid coordinates: {},{}",
                    lat, lng
                )));
            }
            Ok(Some(LatLng { lat, lng }))
        }
        _ => Err(AppError::BadRequest(
            "lat and lng must be given together".to_string(),
        )),
    }
}

/// Build the spatial filter for a request: `bbox` wins over a point and radius.
pub(crate) fn parse_spatial_filter(
    origin: Option<LatLng>,
    radius: Option<f64>,
    bbox: Option<&str>,
) -> Result<SpatialFilter, AppError> {
    if let Some(raw) = bbox {
        let bbox = BoundingBox::parse(raw).map_err(AppError::BadRequest)?;
        return Ok(SpatialFilter::BoundingBox(bbox));
    }

    let center = origin.ok_or_else(|| {
        AppError::BadRequest("Either bbox or lat and lng are required".to_string())
    })?;
    let radius_m = radius.unwrap_or(DEFAULT_RADIUS_M);
    if !radius_m.is_finite() || radius_m <= 0.0 || radius_m > MAX_RADIUS_M {
        return Err(AppError::BadRequest(format!(
            "radius must be between 0 and {} metres",
            MAX_RADIUS_M
        )));
    }
    Ok(SpatialFilter::Radius { center, radius_m })
}
