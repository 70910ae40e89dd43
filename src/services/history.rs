//! Historical hourly occupancy with tiered fallback.
//!
//! Tiers are tried in a fixed order and the first usable series wins:
//!
//! - **Event overlap**: annual arrival/departure datasets, each event counted
//!   in every hour bucket it overlaps.
//! - **Pedestrian proxy**: nearby foot-traffic counts mapped to a free ratio
//!   through a [`FreeRatioModel`], scaled by the live bay count.
//! - **Synthetic**: a fixed diurnal template. Always succeeds.
//!
//! Failures inside a tier (timeouts, unknown columns, empty datasets) are
//! logged and move the pipeline to the next tier; they never surface.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::errors::{FetchError, TierFailure};
use crate::helpers::{
    haversine_m, hour_key, hours_between, local_hour, value_as_f64, value_as_id,
    value_as_timestamp,
};
use crate::models::{HistoricalSeries, HistoryTier, HourlyBucket, LatLng};
use crate::services::fields::{detect, first_value, resolve_and_fetch, FieldRole};
use crate::services::normalize::extract_coordinates;
use crate::services::opendata::{
    either_in_range, in_list, OpenDataClient, SortOrder, SpatialFilter, UpstreamQuery,
    MAX_ROWS_PER_FETCH,
};
use crate::services::sensors::fetch_live_sensors;

/// Capacity baseline for the synthetic tier when nothing was observed.
pub const DEFAULT_SYNTHETIC_CAPACITY: u32 = 20;

/// Pedestrian sensors farther than this from the origin are ignored.
const PEDESTRIAN_SEARCH_RADIUS_M: f64 = 1500.0;
const NEAREST_PEDESTRIAN_SENSORS: usize = 3;
const PEDESTRIAN_LOCATION_LIMIT: usize = 500;
const LIVE_CAPACITY_LIMIT: usize = 1000;

/// Free ratio by local hour of day: busy commute peaks, quieter mid-day,
/// mostly free overnight.
pub const DIURNAL_FREE_RATIO: [f64; 24] = [
    0.85, 0.88, 0.90, 0.90, 0.88, 0.80, // 00–05
    0.60, 0.35, 0.25, 0.30, 0.50, 0.50, // 06–11
    0.45, 0.45, 0.50, 0.45, 0.30, 0.25, // 12–17
    0.30, 0.35, 0.60, 0.70, 0.78, 0.82, // 18–23
];

const TIER_ORDER: [HistoryTier; 3] = [
    HistoryTier::EventOverlap,
    HistoryTier::PedestrianProxy,
    HistoryTier::Synthetic,
];

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

/// Inclusive UTC time range a historical series covers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HistoryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl HistoryWindow {
    /// The `days` leading up to the same calendar moment as `now`, moved into
    /// `year`. Feb 29 maps to Feb 28 in non-leap years.
    pub fn aligned_to_year(now: DateTime<Utc>, year: i32, days: i64) -> Self {
        let end = now
            .with_year(year)
            .or_else(|| now.with_day(28).and_then(|d| d.with_year(year)))
            .unwrap_or(now);
        Self {
            start: end - Duration::days(days.max(1)),
            end,
        }
    }
}

// ---------------------------------------------------------------------------
// Tier A: event overlap
// ---------------------------------------------------------------------------

/// Column names resolved for one event dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFields {
    pub arrival: String,
    pub departure: String,
    pub bay: Option<String>,
    pub id: Option<String>,
}

/// One parking event, with the key used for de-duplication.
#[derive(Debug, Clone, PartialEq)]
pub struct ParkingEvent {
    key: String,
    bay: String,
    arrival: DateTime<Utc>,
    departure: Option<DateTime<Utc>>,
}

/// Parse raw event rows. Rows without an arrival time or a bay id are dropped.
pub fn extract_events(rows: &[Value], fields: &EventFields) -> Vec<ParkingEvent> {
    rows.iter()
        .filter_map(|row| {
            let arrival = row.get(&fields.arrival).and_then(value_as_timestamp)?;
            let departure = row.get(&fields.departure).and_then(value_as_timestamp);
            let bay = fields
                .bay
                .as_deref()
                .and_then(|f| row.get(f))
                .filter(|v| !v.is_null())
                .or_else(|| first_value(row, FieldRole::Bay.candidates()))
                .and_then(value_as_id)?;

            let key = fields
                .id
                .as_deref()
                .and_then(|f| row.get(f))
                .and_then(value_as_id)
                .unwrap_or_else(|| {
                    format!(
                        "{}|{}|{}",
                        bay,
                        arrival.to_rfc3339(),
                        departure.map(|d| d.to_rfc3339()).unwrap_or_default()
                    )
                });

            Some(ParkingEvent {
                key,
                bay,
                arrival,
                departure,
            })
        })
        .collect()
}

/// Count, per hour of `window`, how many distinct events overlap it.
///
/// Capacity is the number of distinct bays; per-hour counts are capped at
/// capacity. An event without a departure occupies its arrival hour only.
pub fn aggregate_events(events: &[ParkingEvent], window: &HistoryWindow) -> HistoricalSeries {
    let mut occupied: BTreeMap<String, (DateTime<Utc>, u32)> =
        hours_between(window.start, window.end)
            .into_iter()
            .map(|h| (hour_key(h), (h, 0)))
            .collect();

    let mut seen: HashSet<&str> = HashSet::new();
    let mut bays: HashSet<&str> = HashSet::new();

    for event in events {
        if !seen.insert(&event.key) {
            continue;
        }
        bays.insert(&event.bay);

        let from = event.arrival.max(window.start);
        let to = event.departure.unwrap_or(event.arrival).min(window.end);
        for hour in hours_between(from, to) {
            if let Some((_, occ)) = occupied.get_mut(&hour_key(hour)) {
                *occ += 1;
            }
        }
    }

    let capacity = bays.len() as u32;
    let series = occupied
        .into_values()
        .map(|(ts, occ)| {
            let occ = occ.min(capacity);
            HourlyBucket {
                ts,
                free: capacity - occ,
                occ,
                total: capacity,
            }
        })
        .collect();

    HistoricalSeries {
        capacity,
        series,
        tier: HistoryTier::EventOverlap,
    }
}

/// Arrival/departure candidates paired by naming scheme.
fn arrival_departure_pairs() -> Vec<(String, String)> {
    FieldRole::Arrival
        .candidates()
        .iter()
        .zip(FieldRole::Departure.candidates())
        .map(|(a, d)| (a.to_string(), d.to_string()))
        .collect()
}

fn detected_pair(
    arrival: Option<String>,
    departure: Option<String>,
    pairs: &[(String, String)],
) -> Option<(String, String)> {
    match (arrival, departure) {
        (Some(a), Some(d)) => Some((a, d)),
        (Some(a), None) => {
            let d = pairs
                .iter()
                .find(|(pa, _)| *pa == a)
                .map(|(_, pd)| pd.clone())
                .unwrap_or_else(|| pairs[0].1.clone());
            Some((a, d))
        }
        (None, Some(d)) => pairs.iter().find(|(_, pd)| *pd == d).cloned(),
        (None, None) => None,
    }
}

/// Resolve columns for one event dataset and fetch its rows in the window.
async fn fetch_dataset_events(
    client: &OpenDataClient,
    config: &AppConfig,
    dataset: &str,
    area: &SpatialFilter,
    window: &HistoryWindow,
) -> Result<Vec<ParkingEvent>, FetchError> {
    let timeout = config.history_fetch_timeout;
    let mut detected = detect(
        client,
        dataset,
        &[
            FieldRole::Arrival,
            FieldRole::Departure,
            FieldRole::Bay,
            FieldRole::Identifier,
        ],
        timeout,
    )
    .await;

    let pairs = arrival_departure_pairs();
    let first_guess = detected_pair(
        detected.remove(&FieldRole::Arrival).flatten(),
        detected.remove(&FieldRole::Departure).flatten(),
        &pairs,
    );

    let geo_field = config.datasets.geo_field.as_str();
    let ((arrival, departure), rows) = resolve_and_fetch(first_guess, &pairs, |(a, d)| {
        let query = UpstreamQuery::new()
            .spatial(geo_field, area)
            .filter(either_in_range(&a, &d, window.start, window.end))
            .order_by(&a, SortOrder::Asc);
        async move {
            client
                .fetch(dataset, &query, MAX_ROWS_PER_FETCH, timeout)
                .await
        }
    })
    .await?;

    let fields = EventFields {
        arrival,
        departure,
        bay: detected.remove(&FieldRole::Bay).flatten(),
        id: detected.remove(&FieldRole::Identifier).flatten(),
    };
    if rows.len() >= MAX_ROWS_PER_FETCH {
        tracing::warn!(
            "{}: event rows capped at {}, later hours of the window may be missing",
            dataset,
            MAX_ROWS_PER_FETCH
        );
    }
    tracing::debug!("{}: {} event rows using {:?}", dataset, rows.len(), fields);
    Ok(extract_events(&rows, &fields))
}

async fn event_overlap_tier(ctx: &HistoryContext<'_>) -> Result<HistoricalSeries, TierFailure> {
    let fetches = ctx.datasets.iter().map(|dataset| async move {
        let result =
            fetch_dataset_events(ctx.client, ctx.config, dataset, &ctx.area, &ctx.window).await;
        (dataset, result)
    });

    let mut events = Vec::new();
    for (dataset, result) in futures::future::join_all(fetches).await {
        match result {
            Ok(mut found) => events.append(&mut found),
            Err(e) => tracing::warn!("{}: no usable event data: {}", dataset, e),
        }
    }

    let series = aggregate_events(&events, &ctx.window);
    if series.is_usable() {
        Ok(series)
    } else {
        Err(TierFailure::Unusable {
            capacity: series.capacity,
        })
    }
}

// ---------------------------------------------------------------------------
// Tier B: pedestrian proxy
// ---------------------------------------------------------------------------

/// Maps foot traffic to expected parking availability.
pub trait FreeRatioModel: Send + Sync {
    /// Free ratio for an hour whose mean count is `mean_count`, given the
    /// busiest hour's mean `max_mean_count`.
    fn free_ratio(&self, mean_count: f64, max_mean_count: f64) -> f64;
}

/// `clamp(1 - weight * mean / max, floor, 1)`: more pedestrians, fewer free bays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PedestrianLoadModel {
    pub weight: f64,
    pub floor: f64,
}

impl Default for PedestrianLoadModel {
    fn default() -> Self {
        Self {
            weight: 0.9,
            floor: 0.10,
        }
    }
}

impl FreeRatioModel for PedestrianLoadModel {
    fn free_ratio(&self, mean_count: f64, max_mean_count: f64) -> f64 {
        if max_mean_count <= 0.0 || !mean_count.is_finite() {
            return 1.0;
        }
        (1.0 - self.weight * mean_count / max_mean_count).clamp(self.floor, 1.0)
    }
}

/// Pedestrian counting sensor location.
#[derive(Debug, Clone, PartialEq)]
struct PedestrianSensor {
    id: String,
    distance_m: f64,
}

/// The nearest sensors within the search radius, closest first.
fn nearest_pedestrian_sensors(rows: &[Value], origin: LatLng) -> Vec<PedestrianSensor> {
    let mut sensors: Vec<PedestrianSensor> = rows
        .iter()
        .filter_map(|row| {
            let id = first_value(row, FieldRole::LocationId.candidates()).and_then(value_as_id)?;
            let (lat, lng) = extract_coordinates(row)?;
            let distance_m = haversine_m(origin.lat, origin.lng, lat, lng);
            (distance_m <= PEDESTRIAN_SEARCH_RADIUS_M).then_some(PedestrianSensor { id, distance_m })
        })
        .collect();

    sensors.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
    let mut seen = HashSet::new();
    sensors.retain(|s| seen.insert(s.id.clone()));
    sensors.truncate(NEAREST_PEDESTRIAN_SENSORS);
    sensors
}

/// Mean pedestrian count per local hour of day; `None` for hours without rows.
///
/// The hour comes from an hour column when present, else from the local
/// timestamp in `date_field`.
pub fn mean_count_by_local_hour(rows: &[Value], date_field: &str) -> [Option<f64>; 24] {
    let mut sums = [(0.0_f64, 0u32); 24];

    for row in rows {
        let Some(count) = first_value(row, FieldRole::Count.candidates())
            .and_then(value_as_f64)
            .filter(|c| c.is_finite() && *c >= 0.0)
        else {
            continue;
        };
        let hour = first_value(row, FieldRole::CountHour.candidates())
            .and_then(value_as_f64)
            .filter(|h| (0.0..24.0).contains(h))
            .map(|h| h as usize)
            .or_else(|| {
                row.get(date_field)
                    .and_then(value_as_timestamp)
                    .map(|t| t.hour() as usize)
            });
        if let Some(h) = hour {
            sums[h].0 += count;
            sums[h].1 += 1;
        }
    }

    sums.map(|(sum, n)| (n > 0).then(|| sum / n as f64))
}

/// Free ratio per local hour. Hours without counts use the diurnal template.
pub fn free_ratio_curve(means: &[Option<f64>; 24], model: &dyn FreeRatioModel) -> [f64; 24] {
    let max = means.iter().flatten().fold(0.0_f64, |acc, m| acc.max(*m));
    let mut curve = DIURNAL_FREE_RATIO;
    for (slot, mean) in curve.iter_mut().zip(means) {
        if let Some(m) = mean {
            *slot = model.free_ratio(*m, max);
        }
    }
    curve
}

async fn live_capacity(ctx: &HistoryContext<'_>) -> u32 {
    match fetch_live_sensors(ctx.client, ctx.config, &ctx.area, LIVE_CAPACITY_LIMIT, ctx.now).await {
        // Already one record per sensor id.
        Ok(sensors) => sensors.len() as u32,
        Err(e) => {
            tracing::warn!("Live capacity lookup failed: {}", e);
            0
        }
    }
}

async fn pedestrian_tier(ctx: &HistoryContext<'_>) -> Result<HistoricalSeries, TierFailure> {
    let capacity = live_capacity(ctx).await;
    if capacity == 0 {
        return Err(TierFailure::Unusable { capacity });
    }
    let no_data = TierFailure::NoPedestrianData { capacity };
    let datasets = &ctx.config.datasets;
    let timeout = ctx.config.history_fetch_timeout;

    let locations = ctx
        .client
        .fetch(
            &datasets.pedestrian_locations,
            &UpstreamQuery::new(),
            PEDESTRIAN_LOCATION_LIMIT,
            timeout,
        )
        .await
        .map_err(|e| {
            tracing::warn!("{}: {}", datasets.pedestrian_locations, e);
            TierFailure::NoPedestrianData { capacity }
        })?;
    let sensors = nearest_pedestrian_sensors(&locations, ctx.area.center());
    if sensors.is_empty() {
        return Err(no_data);
    }
    let ids: Vec<String> = sensors.into_iter().map(|s| s.id).collect();

    let mut detected = detect(
        ctx.client,
        &datasets.pedestrian_counts,
        &[FieldRole::LocationId, FieldRole::CountDate],
        timeout,
    )
    .await;
    let location_field = detected
        .remove(&FieldRole::LocationId)
        .flatten()
        .unwrap_or_else(|| FieldRole::LocationId.candidates()[0].to_string());
    let date_candidates: Vec<String> = FieldRole::CountDate
        .candidates()
        .iter()
        .map(|c| c.to_string())
        .collect();

    let window = ctx.window;
    let (date_field, rows) = match resolve_and_fetch(
        detected.remove(&FieldRole::CountDate).flatten(),
        &date_candidates,
        |date_field: String| {
            let query = UpstreamQuery::new()
                .filter(in_list(&location_field, &ids))
                .time_range(&date_field, window.start, window.end)
                .order_by(&date_field, SortOrder::Desc);
            let counts = datasets.pedestrian_counts.as_str();
            async move {
                ctx.client
                    .fetch(counts, &query, MAX_ROWS_PER_FETCH, timeout)
                    .await
            }
        },
    )
    .await
    {
        Ok(hit) => hit,
        Err(e) => {
            tracing::warn!("{}: {}", datasets.pedestrian_counts, e);
            return Err(no_data);
        }
    };

    let means = mean_count_by_local_hour(&rows, &date_field);
    if means.iter().all(Option::is_none) {
        return Err(no_data);
    }
    let curve = free_ratio_curve(&means, ctx.model);

    Ok(HistoricalSeries {
        capacity,
        series: series_from_local_ratios(capacity, &ctx.window, ctx.utc_offset_hours(), &curve),
        tier: HistoryTier::PedestrianProxy,
    })
}

// ---------------------------------------------------------------------------
// Tier C: synthetic
// ---------------------------------------------------------------------------

/// Apply a local-hour free-ratio curve to every UTC hour of `window`.
fn series_from_local_ratios(
    capacity: u32,
    window: &HistoryWindow,
    utc_offset_hours: i32,
    curve: &[f64; 24],
) -> Vec<HourlyBucket> {
    hours_between(window.start, window.end)
        .into_iter()
        .map(|ts| {
            let ratio = curve[local_hour(ts, utc_offset_hours)].clamp(0.0, 1.0);
            let free = ((ratio * capacity as f64).round() as u32).min(capacity);
            HourlyBucket {
                ts,
                free,
                occ: capacity - free,
                total: capacity,
            }
        })
        .collect()
}

/// Diurnal template series. `capacity` of 0 uses the default baseline.
pub fn synthetic_series(capacity: u32, window: &HistoryWindow, utc_offset_hours: i32) -> HistoricalSeries {
    let capacity = if capacity > 0 {
        capacity
    } else {
        DEFAULT_SYNTHETIC_CAPACITY
    };
    // A zero-length window still yields the hour containing `start`.
    let window = HistoryWindow {
        start: window.start,
        end: window.end.max(window.start),
    };
    HistoricalSeries {
        capacity,
        series: series_from_local_ratios(capacity, &window, utc_offset_hours, &DIURNAL_FREE_RATIO),
        tier: HistoryTier::Synthetic,
    }
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

/// Everything one historical lookup needs.
pub struct HistoryContext<'a> {
    pub client: &'a OpenDataClient,
    pub config: &'a AppConfig,
    pub area: SpatialFilter,
    pub window: HistoryWindow,
    pub datasets: &'a [String],
    pub model: &'a dyn FreeRatioModel,
    pub now: DateTime<Utc>,
}

impl HistoryContext<'_> {
    fn utc_offset_hours(&self) -> i32 {
        self.config.local_utc_offset_hours
    }
}

/// Run tiers in order and return the first usable series.
///
/// The synthetic tier always produces a series, so this never fails and
/// never returns an empty series.
pub async fn fetch_annual_hourly(ctx: &HistoryContext<'_>) -> HistoricalSeries {
    let mut capacity_hint: Option<u32> = None;

    for tier in TIER_ORDER {
        let attempt = match tier {
            HistoryTier::EventOverlap => event_overlap_tier(ctx).await,
            HistoryTier::PedestrianProxy => pedestrian_tier(ctx).await,
            HistoryTier::Synthetic => Ok(synthetic_series(
                capacity_hint.unwrap_or(0),
                &ctx.window,
                ctx.utc_offset_hours(),
            )),
        };

        match attempt {
            Ok(series) if series.is_usable() => {
                tracing::info!(
                    "Historical series from {:?}: capacity={} buckets={}",
                    tier,
                    series.capacity,
                    series.series.len()
                );
                return series;
            }
            Ok(series) => {
                capacity_hint = capacity_hint.or((series.capacity > 0).then_some(series.capacity));
            }
            Err(failure) => {
                tracing::warn!("{:?} tier failed: {}", tier, failure);
                capacity_hint = failure.capacity_hint().or(capacity_hint);
            }
        }
    }

    synthetic_series(DEFAULT_SYNTHETIC_CAPACITY, &ctx.window, ctx.utc_offset_hours())
}

/// Historical hourly series around `origin`.
pub async fn fetch_annual_hourly_by_radius(
    client: &OpenDataClient,
    config: &AppConfig,
    origin: LatLng,
    radius_m: f64,
    window: HistoryWindow,
    datasets: &[String],
    now: DateTime<Utc>,
) -> HistoricalSeries {
    let model = PedestrianLoadModel::default();
    let ctx = HistoryContext {
        client,
        config,
        area: SpatialFilter::Radius {
            center: origin,
            radius_m,
        },
        window,
        datasets,
        model: &model,
        now,
    };
    fetch_annual_hourly(&ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse::<DateTime<Utc>>().unwrap()
    }

    fn day_window(day: &str) -> HistoryWindow {
        HistoryWindow {
            start: utc(&format!("{}T00:00:00Z", day)),
            end: utc(&format!("{}T23:59:00Z", day)),
        }
    }

    fn fields(arrival: &str, departure: &str) -> EventFields {
        EventFields {
            arrival: arrival.to_string(),
            departure: departure.to_string(),
            bay: None,
            id: None,
        }
    }

    fn records(rows: Vec<Value>) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_json(json!({ "total_count": rows.len(), "results": rows }))
    }

    fn origin() -> LatLng {
        LatLng {
            lat: -37.81,
            lng: 144.96,
        }
    }

    #[test]
    fn test_event_overlap_counts_every_touched_hour() {
        let rows = vec![json!({
            "bay": "A",
            "arrival": "2024-01-01T10:00Z",
            "departure": "2024-01-01T12:30Z"
        })];
        let events = extract_events(&rows, &fields("arrival", "departure"));
        let result = aggregate_events(&events, &day_window("2024-01-01"));

        assert_eq!(result.capacity, 1);
        assert_eq!(result.series.len(), 24);
        for bucket in &result.series {
            let hour = bucket.ts.hour();
            let expected = if (10..=12).contains(&hour) { 1 } else { 0 };
            assert_eq!(bucket.occ, expected, "hour {}", hour);
            assert_eq!(bucket.free + bucket.occ, bucket.total);
        }
    }

    #[test]
    fn test_event_overlap_dedupes_and_caps_at_capacity() {
        let rows = vec![
            json!({ "bay": "A", "arrival": "2024-01-01T10:00:00", "departure": "2024-01-01T10:40:00" }),
            json!({ "bay": "A", "arrival": "2024-01-01T10:00:00", "departure": "2024-01-01T10:40:00" }),
            json!({ "bay": "A", "arrival": "2024-01-01T10:20:00", "departure": "2024-01-01T10:50:00" }),
        ];
        let events = extract_events(&rows, &fields("arrival", "departure"));
        assert_eq!(events.len(), 3);

        let result = aggregate_events(&events, &day_window("2024-01-01"));
        assert_eq!(result.capacity, 1);
        let ten = result.series.iter().find(|b| b.ts.hour() == 10).unwrap();
        assert_eq!(ten.occ, 1, "two distinct events on one bay are capped");
        assert_eq!(ten.free, 0);
    }

    #[test]
    fn test_event_overlap_clips_to_window_and_handles_open_events() {
        let rows = vec![
            // Started the day before, ends at 01:15.
            json!({ "bay_id": 1, "arrival": "2023-12-31T22:00:00Z", "departure": "2024-01-01T01:15:00Z" }),
            // No departure recorded.
            json!({ "bay_id": 2, "arrival": "2024-01-01T05:30:00Z", "departure": null }),
            // No arrival: dropped.
            json!({ "bay_id": 3, "departure": "2024-01-01T07:00:00Z" }),
        ];
        let events = extract_events(&rows, &fields("arrival", "departure"));
        assert_eq!(events.len(), 2);

        let result = aggregate_events(&events, &day_window("2024-01-01"));
        assert_eq!(result.capacity, 2);
        let occupied: Vec<u32> = result
            .series
            .iter()
            .filter(|b| b.occ > 0)
            .map(|b| b.ts.hour())
            .collect();
        assert_eq!(occupied, vec![0, 1, 5]);
    }

    #[test]
    fn test_explicit_id_wins_over_composite_key() {
        let mut f = fields("arrival", "departure");
        f.id = Some("record_id".to_string());
        let rows = vec![
            json!({ "record_id": 7, "bay": "A", "arrival": "2024-01-01T10:00:00Z" }),
            json!({ "record_id": 7, "bay": "B", "arrival": "2024-01-01T11:00:00Z" }),
        ];
        let events = extract_events(&rows, &f);
        let result = aggregate_events(&events, &day_window("2024-01-01"));
        assert_eq!(result.capacity, 1);
    }

    #[test]
    fn test_empty_events_are_unusable() {
        let result = aggregate_events(&[], &day_window("2024-01-01"));
        assert_eq!(result.capacity, 0);
        assert!(!result.is_usable());
    }

    #[test]
    fn test_detected_pair_completes_missing_half() {
        let pairs = arrival_departure_pairs();
        assert_eq!(
            detected_pair(Some("arrival_time".to_string()), None, &pairs),
            Some(("arrival_time".to_string(), "departure_time".to_string()))
        );
        assert_eq!(
            detected_pair(None, Some("end_time".to_string()), &pairs),
            Some(("start_time".to_string(), "end_time".to_string()))
        );
        assert_eq!(detected_pair(None, None, &pairs), None);
    }

    #[test]
    fn test_pedestrian_model_formula_and_floor() {
        let model = PedestrianLoadModel::default();
        assert!((model.free_ratio(0.0, 100.0) - 1.0).abs() < 1e-9);
        assert!((model.free_ratio(50.0, 100.0) - 0.55).abs() < 1e-9);
        assert!((model.free_ratio(100.0, 100.0) - 0.10).abs() < 1e-9);
        assert_eq!(model.free_ratio(10.0, 0.0), 1.0);
    }

    struct AlwaysHalf;

    impl FreeRatioModel for AlwaysHalf {
        fn free_ratio(&self, _mean_count: f64, _max_mean_count: f64) -> f64 {
            0.5
        }
    }

    #[test]
    fn test_free_ratio_curve_uses_model_and_template_gaps() {
        let mut means = [None; 24];
        means[8] = Some(900.0);
        means[3] = Some(100.0);

        let curve = free_ratio_curve(&means, &PedestrianLoadModel::default());
        assert!((curve[8] - 0.10).abs() < 1e-9);
        assert!((curve[3] - 0.90).abs() < 1e-9);
        assert_eq!(curve[12], DIURNAL_FREE_RATIO[12]);

        let curve = free_ratio_curve(&means, &AlwaysHalf);
        assert_eq!(curve[8], 0.5);
        assert_eq!(curve[0], DIURNAL_FREE_RATIO[0]);
    }

    #[test]
    fn test_mean_count_by_local_hour() {
        let rows = vec![
            json!({ "hourday": 8, "pedestriancount": 100 }),
            json!({ "hourday": "8", "pedestriancount": 300 }),
            json!({ "sensing_datetime": "2019-05-01T17:00:00", "total_of_directions": 50 }),
            json!({ "hourday": 30, "pedestriancount": 5 }),
            json!({ "hourday": 9 }),
        ];
        let means = mean_count_by_local_hour(&rows, "sensing_datetime");
        assert_eq!(means[8], Some(200.0));
        assert_eq!(means[17], Some(50.0));
        assert_eq!(means[9], None);
        assert_eq!(means.iter().flatten().count(), 2);
    }

    #[test]
    fn test_nearest_pedestrian_sensors_within_radius() {
        let rows = vec![
            json!({ "location_id": 3, "latitude": -37.8150, "longitude": 144.96 }),
            json!({ "location_id": 1, "latitude": -37.8101, "longitude": 144.96 }),
            json!({ "location_id": 9, "latitude": -37.90, "longitude": 144.96 }),
            json!({ "location_id": 1, "latitude": -37.8101, "longitude": 144.96 }),
            json!({ "latitude": -37.81, "longitude": 144.96 }),
        ];
        let sensors = nearest_pedestrian_sensors(&rows, origin());
        let ids: Vec<&str> = sensors.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn test_synthetic_series_uses_local_template() {
        let window = day_window("2024-01-01");
        let result = synthetic_series(0, &window, 10);
        assert_eq!(result.capacity, DEFAULT_SYNTHETIC_CAPACITY);
        assert_eq!(result.tier, HistoryTier::Synthetic);
        assert_eq!(result.series.len(), 24);

        // 22:00 UTC is 08:00 local, the morning low.
        let peak = result.series.iter().find(|b| b.ts.hour() == 22).unwrap();
        assert_eq!(peak.free, 5);
        assert_eq!(peak.occ, 15);

        let reversed = HistoryWindow {
            start: window.end,
            end: window.start,
        };
        assert!(synthetic_series(4, &reversed, 10).is_usable());
    }

    #[test]
    fn test_window_aligned_to_history_year() {
        let window = HistoryWindow::aligned_to_year(utc("2024-05-20T09:30:00Z"), 2019, 28);
        assert_eq!(window.end, utc("2019-05-20T09:30:00Z"));
        assert_eq!(window.start, utc("2019-04-22T09:30:00Z"));

        let leap = HistoryWindow::aligned_to_year(utc("2024-02-29T12:00:00Z"), 2019, 1);
        assert_eq!(leap.end, utc("2019-02-28T12:00:00Z"));
    }

    #[tokio::test]
    async fn test_all_tiers_empty_falls_back_to_synthetic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(records(Vec::new()))
            .mount(&server)
            .await;

        let config = AppConfig::for_base_url(&server.uri());
        let client = OpenDataClient::new(&config.open_data_base_url, &config.user_agent);
        let result = fetch_annual_hourly_by_radius(
            &client,
            &config,
            origin(),
            300.0,
            day_window("2019-05-01"),
            &config.datasets.annual_events,
            utc("2024-05-01T00:00:00Z"),
        )
        .await;

        assert_eq!(result.tier, HistoryTier::Synthetic);
        assert!(result.capacity > 0);
        assert!(!result.series.is_empty());
        assert!(result.series.windows(2).all(|w| w[0].ts < w[1].ts));
    }

    #[tokio::test]
    async fn test_upstream_errors_fall_back_to_synthetic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = AppConfig::for_base_url(&server.uri());
        let client = OpenDataClient::new(&config.open_data_base_url, &config.user_agent);
        let result = fetch_annual_hourly_by_radius(
            &client,
            &config,
            origin(),
            300.0,
            day_window("2019-05-01"),
            &config.datasets.annual_events,
            utc("2024-05-01T00:00:00Z"),
        )
        .await;

        assert_eq!(result.tier, HistoryTier::Synthetic);
        assert_eq!(result.capacity, DEFAULT_SYNTHETIC_CAPACITY);
    }

    #[tokio::test]
    async fn test_event_tier_merges_datasets() {
        let server = MockServer::start().await;
        let rows = vec![
            json!({ "deviceid": "D1", "arrivaltime": "2019-05-01T08:10:00", "departuretime": "2019-05-01T09:20:00" }),
            json!({ "deviceid": "D2", "arrivaltime": "2019-05-01T14:00:00", "departuretime": "2019-05-01T14:30:00" }),
        ];
        // Both annual datasets return the same events; they must be counted once.
        Mock::given(method("GET"))
            .respond_with(records(rows))
            .mount(&server)
            .await;

        let config = AppConfig::for_base_url(&server.uri());
        let client = OpenDataClient::new(&config.open_data_base_url, &config.user_agent);
        let result = fetch_annual_hourly_by_radius(
            &client,
            &config,
            origin(),
            300.0,
            day_window("2019-05-01"),
            &config.datasets.annual_events,
            utc("2024-05-01T00:00:00Z"),
        )
        .await;

        assert_eq!(result.tier, HistoryTier::EventOverlap);
        assert_eq!(result.capacity, 2);
        let occ: Vec<(u32, u32)> = result
            .series
            .iter()
            .filter(|b| b.occ > 0)
            .map(|b| (b.ts.hour(), b.occ))
            .collect();
        assert_eq!(occ, vec![(8, 1), (9, 1), (14, 1)]);
    }

    #[tokio::test]
    async fn test_pedestrian_tier_when_no_events() {
        let server = MockServer::start().await;
        for dataset in ["events-2019", "events-2020"] {
            Mock::given(method("GET"))
                .and(path(format!("/catalog/datasets/{}/records", dataset)))
                .respond_with(records(Vec::new()))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/catalog/datasets/bays/records"))
            .respond_with(records(vec![
                json!({ "kerbsideid": 1, "status": "Present", "lat": -37.81, "lon": 144.96 }),
                json!({ "kerbsideid": 2, "status": "Unoccupied", "lat": -37.8101, "lon": 144.9601 }),
            ]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/catalog/datasets/ped-locations/records"))
            .respond_with(records(vec![
                json!({ "location_id": 1, "latitude": -37.811, "longitude": 144.96 }),
                json!({ "location_id": 2, "latitude": -37.95, "longitude": 144.96 }),
            ]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/catalog/datasets/ped-counts/records"))
            .respond_with(records(vec![
                json!({ "location_id": 1, "sensing_date": "2019-05-01", "hourday": 8, "pedestriancount": 900 }),
                json!({ "location_id": 1, "sensing_date": "2019-05-01", "hourday": 3, "pedestriancount": 100 }),
            ]))
            .mount(&server)
            .await;

        let config = AppConfig::for_base_url(&server.uri());
        let client = OpenDataClient::new(&config.open_data_base_url, &config.user_agent);
        let result = fetch_annual_hourly_by_radius(
            &client,
            &config,
            origin(),
            300.0,
            day_window("2019-05-01"),
            &config.datasets.annual_events,
            utc("2024-05-01T00:00:00Z"),
        )
        .await;

        assert_eq!(result.tier, HistoryTier::PedestrianProxy);
        assert_eq!(result.capacity, 2);
        // UTC+10: local 08:00 is 22:00 UTC, local 03:00 is 17:00 UTC.
        let at = |h: u32| result.series.iter().find(|b| b.ts.hour() == h).unwrap().clone();
        assert_eq!((at(22).free, at(22).occ), (0, 2));
        assert_eq!((at(17).free, at(17).occ), (2, 0));
    }

    /// Three live bays, no events, and the given pedestrian-locations response.
    async fn history_with_pedestrian_locations(locations: ResponseTemplate) -> HistoricalSeries {
        let server = MockServer::start().await;
        for dataset in ["events-2019", "events-2020", "ped-counts"] {
            Mock::given(method("GET"))
                .and(path(format!("/catalog/datasets/{}/records", dataset)))
                .respond_with(records(Vec::new()))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/catalog/datasets/bays/records"))
            .respond_with(records(vec![
                json!({ "kerbsideid": 1, "status": "Present", "lat": -37.81, "lon": 144.96 }),
                json!({ "kerbsideid": 2, "status": "Unoccupied", "lat": -37.8101, "lon": 144.9601 }),
                json!({ "kerbsideid": 3, "status": "Unoccupied", "lat": -37.8102, "lon": 144.9602 }),
            ]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/catalog/datasets/ped-locations/records"))
            .respond_with(locations)
            .mount(&server)
            .await;

        let config = AppConfig::for_base_url(&server.uri());
        let client = OpenDataClient::new(&config.open_data_base_url, &config.user_agent);
        fetch_annual_hourly_by_radius(
            &client,
            &config,
            origin(),
            300.0,
            day_window("2019-05-01"),
            &config.datasets.annual_events,
            utc("2024-05-01T00:00:00Z"),
        )
        .await
    }

    #[tokio::test]
    async fn test_failed_pedestrian_lookup_keeps_live_capacity() {
        let result = history_with_pedestrian_locations(ResponseTemplate::new(500)).await;

        assert_eq!(result.tier, HistoryTier::Synthetic);
        assert_eq!(result.capacity, 3);
        assert!(result.series.iter().all(|b| b.total == 3));
    }

    #[tokio::test]
    async fn test_no_pedestrian_sensors_keeps_live_capacity() {
        let far_away = records(vec![
            json!({ "location_id": 9, "latitude": -38.5, "longitude": 145.5 }),
        ]);
        let result = history_with_pedestrian_locations(far_away).await;

        assert_eq!(result.tier, HistoryTier::Synthetic);
        assert_eq!(result.capacity, 3);
    }
}
