//! In-memory per-area hourly time series.
//!
//! Live snapshots are folded into one averaged bucket per `(area_id, hour)`.
//! The store is the forecasting substrate when no historical upstream data is
//! available. It is volatile: a restart begins from an empty map.
//!
//! Lifecycle: `new` (empty) → `record*` (upsert-and-prune under a single write
//! guard, so concurrent requests cannot lose each other's updates) →
//! `snapshot` (copy out).

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::helpers::floor_to_hour;
use crate::models::{AreaCell, HourlyBucket};

/// Running means for one hour of one area.
#[derive(Debug, Clone, PartialEq)]
struct StoredBucket {
    free: f64,
    occ: f64,
    total: f64,
    /// Number of samples folded into the means.
    n: u32,
}

impl StoredBucket {
    fn first(sample: &HourlyBucket) -> Self {
        Self {
            free: sample.free as f64,
            occ: sample.occ as f64,
            total: sample.total as f64,
            n: 1,
        }
    }

    fn merge(&mut self, sample: &HourlyBucket) {
        let n = self.n as f64 + 1.0;
        self.free += (sample.free as f64 - self.free) / n;
        self.occ += (sample.occ as f64 - self.occ) / n;
        self.total += (sample.total as f64 - self.total) / n;
        self.n += 1;
    }

    fn to_bucket(&self, ts: DateTime<Utc>) -> HourlyBucket {
        HourlyBucket {
            ts,
            free: self.free.round() as u32,
            occ: self.occ.round() as u32,
            total: self.total.round() as u32,
        }
    }
}

type AreaSeries = BTreeMap<DateTime<Utc>, StoredBucket>;

/// Shared handle to the process-wide series store. Cloning shares the data.
#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    inner: Arc<RwLock<HashMap<String, AreaSeries>>>,
    retention: Duration,
}

impl TimeSeriesStore {
    pub fn new(retention_days: i64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            retention: Duration::days(retention_days.max(1)),
        }
    }

    /// Merge one sample into its hour bucket, then drop everything older than
    /// the retention window relative to `now`.
    pub async fn record(&self, area_id: &str, sample: HourlyBucket, now: DateTime<Utc>) {
        let mut map = self.inner.write().await;
        upsert(&mut map, area_id, &sample);
        prune(&mut map, now - self.retention);
    }

    /// Record the current state of every cell as one sample each.
    pub async fn record_snapshot(&self, cells: &[AreaCell], now: DateTime<Utc>) {
        let ts = floor_to_hour(now);
        let mut map = self.inner.write().await;
        for cell in cells.iter().filter(|c| c.total_bays > 0) {
            let sample = HourlyBucket {
                ts,
                free: cell.available_bays,
                occ: cell.total_bays.saturating_sub(cell.available_bays),
                total: cell.total_bays,
            };
            upsert(&mut map, &cell.area_id, &sample);
        }
        prune(&mut map, now - self.retention);
    }

    /// All retained buckets for an area, oldest first.
    pub async fn snapshot(&self, area_id: &str) -> Vec<HourlyBucket> {
        let map = self.inner.read().await;
        map.get(area_id)
            .map(|series| series.iter().map(|(ts, b)| b.to_bucket(*ts)).collect())
            .unwrap_or_default()
    }

    /// Number of areas currently holding samples.
    pub async fn area_count(&self) -> usize {
        self.inner.read().await.len()
    }
}

fn upsert(map: &mut HashMap<String, AreaSeries>, area_id: &str, sample: &HourlyBucket) {
    let hour = floor_to_hour(sample.ts);
    map.entry(area_id.to_string())
        .or_default()
        .entry(hour)
        .and_modify(|b| b.merge(sample))
        .or_insert_with(|| StoredBucket::first(sample));
}

fn prune(map: &mut HashMap<String, AreaSeries>, cutoff: DateTime<Utc>) {
    map.retain(|_, series| {
        series.retain(|ts, _| *ts >= cutoff);
        !series.is_empty()
    });
}
