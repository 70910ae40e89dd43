//! Paginated client for the open-data portal's tabular records API.
//!
//! Each dataset is queried at `{base}/catalog/datasets/{id}/records` with
//! `where`, `order_by`, `limit` and `offset` parameters; responses
//! are `{ "total_count": N, "results": [ {...}, ... ] }`. Rows are returned as
//! raw `serde_json::Value` objects because column names differ between
//! datasets and years (see `services::fields`).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::errors::FetchError;
use crate::models::LatLng;

/// Rows requested per page. The portal rejects larger pages.
pub const PAGE_SIZE: usize = 100;

/// Hard cap on rows collected by one fetch (the portal's offset ceiling).
pub const MAX_ROWS_PER_FETCH: usize = 10_000;

#[derive(Debug, Deserialize)]
struct RecordsPage {
    #[serde(default)]
    results: Vec<Value>,
}

/// Sort direction for `order_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Axis-aligned bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Parse `minLng,minLat,maxLng,maxLat`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let parts: Vec<f64> = raw
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("bbox must be four numbers: {}", e))?;

        let [min_lng, min_lat, max_lng, max_lat] = parts[..] else {
            return Err(format!("bbox must have 4 values, got {}", parts.len()));
        };

        if parts.iter().any(|v| !v.is_finite()) {
            return Err("bbox values must be finite".to_string());
        }
        if min_lng >= max_lng || min_lat >= max_lat {
            return Err("bbox min must be below max".to_string());
        }
        if min_lat < -90.0 || max_lat > 90.0 || min_lng < -180.0 || max_lng > 180.0 {
            return Err("bbox out of WGS84 range".to_string());
        }

        Ok(Self {
            min_lng,
            min_lat,
            max_lng,
            max_lat,
        })
    }

    pub fn center(&self) -> LatLng {
        LatLng {
            lat: (self.min_lat + self.max_lat) / 2.0,
            lng: (self.min_lng + self.max_lng) / 2.0,
        }
    }

    /// Closed WKT ring, counter-clockwise from the south-west corner.
    fn to_wkt_polygon(self) -> String {
        format!(
            "POLYGON(({w} {s}, {e} {s}, {e} {n}, {w} {n}, {w} {s}))",
            w = self.min_lng,
            s = self.min_lat,
            e = self.max_lng,
            n = self.max_lat
        )
    }
}

/// Spatial restriction on a geo-point column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpatialFilter {
    Radius { center: LatLng, radius_m: f64 },
    BoundingBox(BoundingBox),
}

impl SpatialFilter {
    pub fn center(&self) -> LatLng {
        match self {
            SpatialFilter::Radius { center, .. } => *center,
            SpatialFilter::BoundingBox(bbox) => bbox.center(),
        }
    }

    /// Render as a `where` predicate on `geo_field`.
    pub fn to_predicate(&self, geo_field: &str) -> String {
        match self {
            SpatialFilter::Radius { center, radius_m } => format!(
                "distance({}, geom'POINT({} {})', {}m)",
                geo_field,
                center.lng,
                center.lat,
                radius_m.max(1.0).round() as u64
            ),
            SpatialFilter::BoundingBox(bbox) => {
                format!("within({}, geom'{}')", geo_field, bbox.to_wkt_polygon())
            }
        }
    }
}

/// Query parameters for one dataset fetch (everything except paging).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpstreamQuery {
    clauses: Vec<String>,
    order_by: Option<String>,
}

impl UpstreamQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw predicate; all predicates are AND-ed.
    pub fn filter(mut self, clause: impl Into<String>) -> Self {
        self.clauses.push(clause.into());
        self
    }

    pub fn spatial(self, geo_field: &str, filter: &SpatialFilter) -> Self {
        self.filter(filter.to_predicate(geo_field))
    }

    /// `start <= field <= end`.
    pub fn time_range(self, field: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.filter(range_predicate(field, start, end))
    }

    pub fn order_by(mut self, field: &str, order: SortOrder) -> Self {
        let dir = match order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        self.order_by = Some(format!("{} {}", field, dir));
        self
    }

    /// The combined `where` string, or `None` without predicates.
    pub fn where_clause(&self) -> Option<String> {
        match self.clauses.len() {
            0 => None,
            1 => Some(self.clauses[0].clone()),
            _ => Some(
                self.clauses
                    .iter()
                    .map(|c| format!("({})", c))
                    .collect::<Vec<_>>()
                    .join(" AND "),
            ),
        }
    }

    fn params(&self, limit: usize, offset: usize) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(4);
        if let Some(w) = self.where_clause() {
            params.push(("where", w));
        }
        if let Some(o) = &self.order_by {
            params.push(("order_by", o.clone()));
        }
        params.push(("limit", limit.to_string()));
        params.push(("offset", offset.to_string()));
        params
    }
}

fn date_literal(dt: DateTime<Utc>) -> String {
    format!("date'{}'", dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn range_predicate(field: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    format!(
        "{f} >= {s} AND {f} <= {e}",
        f = field,
        s = date_literal(start),
        e = date_literal(end)
    )
}

/// Predicate matching rows where either `field_a` or `field_b` lies in the window.
pub fn either_in_range(
    field_a: &str,
    field_b: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> String {
    format!(
        "({}) OR ({})",
        range_predicate(field_a, start, end),
        range_predicate(field_b, start, end)
    )
}

/// `field IN ("a", "b")` for string identifiers.
pub fn in_list(field: &str, values: &[String]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|v| format!("\"{}\"", v.replace('"', "")))
        .collect();
    format!("{} IN ({})", field, quoted.join(", "))
}

/// Client for the open-data records API.
#[derive(Debug, Clone)]
pub struct OpenDataClient {
    client: reqwest::Client,
    base_url: String,
}

impl OpenDataClient {
    /// Every request identifies itself with `user_agent`.
    pub fn new(base_url: &str, user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch up to `desired` rows, paging until enough rows are collected or
    /// a short page signals the end of the data.
    ///
    /// A failed page aborts this fetch only; the caller decides whether to
    /// fall back to another field, dataset or tier.
    pub async fn fetch(
        &self,
        dataset: &str,
        query: &UpstreamQuery,
        desired: usize,
        timeout: Duration,
    ) -> Result<Vec<Value>, FetchError> {
        let desired = desired.min(MAX_ROWS_PER_FETCH);
        let url = format!("{}/catalog/datasets/{}/records", self.base_url, dataset);

        let mut rows: Vec<Value> = Vec::new();
        while rows.len() < desired {
            let limit = PAGE_SIZE.min(desired - rows.len());
            let offset = rows.len();
            let page = self.fetch_page(&url, query, limit, offset, timeout).await?;
            let received = page.len();
            tracing::debug!(
                "{}: page offset={} limit={} returned {} rows",
                dataset,
                offset,
                limit,
                received
            );
            rows.extend(page);
            if received < limit {
                break;
            }
        }

        Ok(rows)
    }

    /// Fetch a single row, used for schema detection.
    pub async fn fetch_sample(
        &self,
        dataset: &str,
        timeout: Duration,
    ) -> Result<Option<Value>, FetchError> {
        let mut rows = self.fetch(dataset, &UpstreamQuery::new(), 1, timeout).await?;
        Ok(rows.pop())
    }

    async fn fetch_page(
        &self,
        url: &str,
        query: &UpstreamQuery,
        limit: usize,
        offset: usize,
        timeout: Duration,
    ) -> Result<Vec<Value>, FetchError> {
        let response = self
            .client
            .get(url)
            .query(&query.params(limit, offset))
            .timeout(timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Transient(format!(
                "{} returned HTTP {}",
                url,
                response.status()
            )));
        }

        let page: RecordsPage = response
            .json()
            .await
            .map_err(|e| FetchError::Transient(format!("malformed records page: {}", e)))?;

        Ok(page.results)
    }
}
