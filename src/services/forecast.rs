//! Occupancy forecasting.
//!
//! A forecast is an hour-of-day profile (mean and 10th/90th percentile free
//! ratio per UTC hour) projected forward against a capacity baseline. The
//! profile comes from the historical tiers or from the live snapshots
//! accumulated in the time-series store, depending on the requested source.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::errors::FetchError;
use crate::helpers::{floor_to_hour, round2};
use crate::models::{ForecastPoint, HistoricalSeries, HistoryTier, HodProfile, HodSlot, HourlyBucket, LatLng};
use crate::services::areas::{cell_geometry, cell_of, CellGeometry};
use crate::services::history::{fetch_annual_hourly_by_radius, synthetic_series, HistoryWindow};
use crate::services::opendata::OpenDataClient;
use crate::services::timeseries::TimeSeriesStore;

/// Slot used for hours with no samples.
pub const DEFAULT_SLOT: HodSlot = HodSlot {
    mean: 0.5,
    p10: 0.25,
    p90: 0.9,
};

/// Longest projection a caller may ask for.
pub const MAX_FORECAST_HOURS: u32 = 168;

// ---------------------------------------------------------------------------
// Profile and projection
// ---------------------------------------------------------------------------

/// Percentile of an ascending slice by linear interpolation between closest
/// ranks. `p` is in `[0, 1]`; the slice must not be empty.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Build a 24-slot free-ratio profile keyed by UTC hour of day.
///
/// Buckets with unknown capacity are ignored. Hours without samples get
/// [`DEFAULT_SLOT`].
pub fn build_hod_profile(buckets: &[HourlyBucket]) -> HodProfile {
    let mut by_hour: Vec<Vec<f64>> = vec![Vec::new(); 24];
    for bucket in buckets {
        if let Some(ratio) = bucket.free_ratio() {
            by_hour[bucket.ts.hour() as usize].push(ratio);
        }
    }

    let slots = by_hour
        .into_iter()
        .map(|mut ratios| {
            if ratios.is_empty() {
                return DEFAULT_SLOT;
            }
            ratios.sort_by(f64::total_cmp);
            let mean = ratios.iter().sum::<f64>() / ratios.len() as f64;
            HodSlot {
                mean: mean.clamp(0.0, 1.0),
                p10: percentile(&ratios, 0.10).clamp(0.0, 1.0),
                p90: percentile(&ratios, 0.90).clamp(0.0, 1.0),
            }
        })
        .collect();

    HodProfile { slots }
}

/// Project `hours` points starting at the hour after `now`.
///
/// Ratios are scaled by `base_total` and clamped to `[0, base_total]`; the
/// bounds are then ordered so `lo80 <= expected_available <= hi80`.
pub fn forecast(hours: u32, base_total: u32, profile: &HodProfile, now: DateTime<Utc>) -> Vec<ForecastPoint> {
    let start = floor_to_hour(now) + Duration::hours(1);
    let scale = |ratio: f64| ((ratio.clamp(0.0, 1.0) * base_total as f64).round() as u32).min(base_total);

    (0..hours)
        .map(|i| {
            let ts = start + Duration::hours(i as i64);
            let slot = profile
                .slots
                .get(ts.hour() as usize)
                .copied()
                .unwrap_or(DEFAULT_SLOT);
            let expected = scale(slot.mean);
            ForecastPoint {
                ts,
                expected_available: expected,
                lo80: scale(slot.p10).min(expected),
                hi80: scale(slot.p90).max(expected),
                free_ratio: round2(slot.mean),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Source selection
// ---------------------------------------------------------------------------

/// Where the profile should come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ForecastSource {
    /// Historical tiers only.
    History,
    /// Snapshots accumulated from live views.
    Live,
    /// Real historical data, else live snapshots, else the synthetic curve.
    #[default]
    Auto,
}

/// What to forecast for.
#[derive(Debug, Clone, PartialEq)]
pub enum ForecastTarget {
    Area(String),
    Coords(LatLng),
}

/// Forecast with the provenance of its profile.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AreaForecast {
    pub area_id: String,
    pub center: LatLng,
    /// Source actually used (`history` or `live`).
    pub source: ForecastSource,
    /// Historical tier behind the profile; absent for live snapshots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<HistoryTier>,
    pub capacity: u32,
    pub points: Vec<ForecastPoint>,
}

fn resolve_target(target: &ForecastTarget, config: &AppConfig) -> Result<CellGeometry, FetchError> {
    match target {
        ForecastTarget::Area(area_id) => cell_geometry(area_id),
        ForecastTarget::Coords(ll) => {
            let resolution = h3o::Resolution::try_from(config.default_resolution)
                .map_err(|e| FetchError::InvalidSpatialIdentifier(e.to_string()))?;
            let cell = cell_of(ll.lat, ll.lng, resolution).ok_or_else(|| {
                FetchError::InvalidSpatialIdentifier(format!("{},{}", ll.lat, ll.lng))
            })?;
            cell_geometry(&cell.to_string())
        }
    }
}

/// Profile basis chosen for one forecast.
struct Basis {
    source: ForecastSource,
    tier: Option<HistoryTier>,
    capacity: u32,
    buckets: Vec<HourlyBucket>,
}

impl Basis {
    fn from_history(series: HistoricalSeries) -> Self {
        Self {
            source: ForecastSource::History,
            tier: Some(series.tier),
            capacity: series.capacity,
            buckets: series.series,
        }
    }
}

/// Live snapshots for the area, or `None` when the store has none.
fn live_basis(snapshots: Vec<HourlyBucket>) -> Option<Basis> {
    let capacity = snapshots.iter().rev().map(|b| b.total).find(|t| *t > 0)?;
    Some(Basis {
        source: ForecastSource::Live,
        tier: None,
        capacity,
        buckets: snapshots,
    })
}

/// Forecast the next `hours` for an area id or a coordinate pair.
///
/// Only a malformed area id (or unusable coordinates) fails; every other
/// path ends in at least the synthetic profile.
pub async fn forecast_for(
    client: &OpenDataClient,
    config: &AppConfig,
    store: &TimeSeriesStore,
    target: &ForecastTarget,
    hours: u32,
    source: ForecastSource,
    now: DateTime<Utc>,
) -> Result<AreaForecast, FetchError> {
    let geometry = resolve_target(target, config)?;
    let area_id = geometry.cell.to_string();
    let hours = hours.clamp(1, MAX_FORECAST_HOURS);

    let history = || async move {
        let window = HistoryWindow::aligned_to_year(now, config.history_year, config.history_window_days);
        fetch_annual_hourly_by_radius(
            client,
            config,
            geometry.center,
            geometry.search_radius_m,
            window,
            &config.datasets.annual_events,
            now,
        )
        .await
    };
    let synthetic = || {
        let window = HistoryWindow {
            start: now - Duration::days(1),
            end: now,
        };
        Basis::from_history(synthetic_series(0, &window, config.local_utc_offset_hours))
    };

    let basis = match source {
        ForecastSource::History => Basis::from_history(history().await),
        ForecastSource::Live => live_basis(store.snapshot(&area_id).await).unwrap_or_else(synthetic),
        ForecastSource::Auto => {
            let series = history().await;
            if series.tier != HistoryTier::Synthetic {
                Basis::from_history(series)
            } else {
                live_basis(store.snapshot(&area_id).await)
                    .unwrap_or_else(|| Basis::from_history(series))
            }
        }
    };

    tracing::info!(
        "Forecast {} from {:?} (tier {:?}, capacity {}, {} buckets)",
        area_id,
        basis.source,
        basis.tier,
        basis.capacity,
        basis.buckets.len()
    );

    let profile = build_hod_profile(&basis.buckets);
    Ok(AreaForecast {
        area_id,
        center: geometry.center,
        source: basis.source,
        tier: basis.tier,
        capacity: basis.capacity,
        points: forecast(hours, basis.capacity, &profile, now),
    })
}
