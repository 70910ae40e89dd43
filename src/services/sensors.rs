//! Live bay-sensor acquisition.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use crate::config::AppConfig;
use crate::errors::FetchError;
use crate::models::SensorRecord;
use crate::services::normalize::normalize;
use crate::services::opendata::{OpenDataClient, SpatialFilter, UpstreamQuery};

/// Fetch and normalize the live sensors inside `area`.
///
/// An empty result is a valid answer. Transport failures are returned so the
/// caller can report them; nothing here falls back.
pub async fn fetch_live_sensors(
    client: &OpenDataClient,
    config: &AppConfig,
    area: &SpatialFilter,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<Vec<SensorRecord>, FetchError> {
    let query = UpstreamQuery::new().spatial(&config.datasets.geo_field, area);
    let rows = client
        .fetch(
            &config.datasets.live_sensors,
            &query,
            limit,
            config.live_fetch_timeout,
        )
        .await?;

    let records = normalize_rows(&rows, now);
    tracing::debug!(
        "{}: {} rows → {} sensors",
        config.datasets.live_sensors,
        rows.len(),
        records.len()
    );
    Ok(records)
}

/// Normalize rows, keeping only the most recent reading per sensor id.
///
/// Output follows first-seen order of each id.
pub fn normalize_rows(rows: &[Value], now: DateTime<Utc>) -> Vec<SensorRecord> {
    let mut records: Vec<SensorRecord> = Vec::with_capacity(rows.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in rows.iter().filter_map(|row| normalize(row, now)) {
        match index.get(&record.id) {
            Some(&i) => {
                if record.updated_at > records[i].updated_at {
                    records[i] = record;
                }
            }
            None => {
                index.insert(record.id.clone(), records.len());
                records.push(record);
            }
        }
    }

    records
}
