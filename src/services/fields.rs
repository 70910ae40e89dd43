//! Schema-adaptive field resolution.
//!
//! The same concept lives under different column names depending on the feed
//! and the year it was published. Each semantic role carries a ranked list of
//! candidate names. Resolution is two-level:
//!
//! 1. **Detect**: fetch one sample row and pick, per role, the first candidate
//!    present as a key.
//! 2. **Verify / brute force**: query with the detected name; if detection
//!    found nothing or the query comes back empty, try every candidate in
//!    priority order and keep the first one that returns rows. Sparse columns
//!    are often absent from the sample row even though they exist.

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use crate::errors::FetchError;
use crate::services::opendata::OpenDataClient;

/// A semantic column role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRole {
    Timestamp,
    Identifier,
    Bay,
    Arrival,
    Departure,
    LocationId,
    CountDate,
    CountHour,
    Count,
}

impl FieldRole {
    /// Candidate column names, highest priority first.
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            FieldRole::Timestamp => &[
                "status_timestamp",
                "lastupdated",
                "last_updated",
                "updated_at",
                "timestamp",
            ],
            FieldRole::Identifier => &["id", "record_id", "recordid", "_id"],
            FieldRole::Bay => &[
                "kerbsideid",
                "bay_id",
                "bayid",
                "deviceid",
                "device_id",
                "streetmarker",
                "st_marker_id",
                "marker_id",
                "sensor_id",
                "bay",
            ],
            FieldRole::Arrival => &[
                "arrivaltime",
                "arrival_time",
                "arrival",
                "start_time",
            ],
            FieldRole::Departure => &[
                "departuretime",
                "departure_time",
                "departure",
                "end_time",
            ],
            FieldRole::LocationId => &["location_id", "locationid", "sensor_id"],
            FieldRole::CountDate => &["sensing_date", "sensing_datetime", "date"],
            FieldRole::CountHour => &["hourday", "hour", "time"],
            FieldRole::Count => &["pedestriancount", "total_of_directions", "hourly_counts", "count"],
        }
    }
}

/// Per-role detection result; `None` means no candidate was present.
pub type DetectedFields = HashMap<FieldRole, Option<String>>;

/// First candidate present as a key of `row`.
pub fn first_present(row: &Value, candidates: &[&str]) -> Option<String> {
    let obj = row.as_object()?;
    candidates
        .iter()
        .find(|c| obj.contains_key(**c))
        .map(|c| c.to_string())
}

/// First non-null value among `candidates` in `row`.
pub fn first_value<'a>(row: &'a Value, candidates: &[&str]) -> Option<&'a Value> {
    candidates
        .iter()
        .filter_map(|c| row.get(*c))
        .find(|v| !v.is_null())
}

/// Detect column names for `roles` from a single sample row of `dataset`.
///
/// Never fails: an empty dataset or a failed request yields `None` for every
/// role, which sends callers to the brute-force path.
pub async fn detect(
    client: &OpenDataClient,
    dataset: &str,
    roles: &[FieldRole],
    timeout: Duration,
) -> DetectedFields {
    let sample = match client.fetch_sample(dataset, timeout).await {
        Ok(sample) => sample,
        Err(e) => {
            tracing::warn!("{}: schema detection failed: {}", dataset, e);
            None
        }
    };

    roles
        .iter()
        .map(|&role| {
            let resolved = sample
                .as_ref()
                .and_then(|row| first_present(row, role.candidates()));
            (role, resolved)
        })
        .collect()
}

/// Try `candidates` in order, returning the first whose probe yields rows.
///
/// Probe failures are logged and treated as "this candidate did not work".
pub async fn first_non_empty<C, T, F, Fut>(candidates: &[C], mut probe: F) -> Option<(C, Vec<T>)>
where
    C: Clone + std::fmt::Debug,
    F: FnMut(C) -> Fut,
    Fut: Future<Output = Result<Vec<T>, FetchError>>,
{
    for candidate in candidates {
        match probe(candidate.clone()).await {
            Ok(rows) if !rows.is_empty() => return Some((candidate.clone(), rows)),
            Ok(_) => tracing::debug!("Field candidate {:?} returned no rows", candidate),
            Err(e) => tracing::debug!("Field candidate {:?} failed: {}", candidate, e),
        }
    }
    None
}

/// Detect-then-verify with brute-force fallback.
///
/// `detected` is probed first; when it is absent or comes back empty, every
/// other candidate is tried in priority order.
pub async fn resolve_and_fetch<C, T, F, Fut>(
    detected: Option<C>,
    candidates: &[C],
    mut probe: F,
) -> Result<(C, Vec<T>), FetchError>
where
    C: Clone + PartialEq + std::fmt::Debug,
    F: FnMut(C) -> Fut,
    Fut: Future<Output = Result<Vec<T>, FetchError>>,
{
    if let Some(field) = &detected {
        if let Some(hit) = first_non_empty(std::slice::from_ref(field), &mut probe).await {
            return Ok(hit);
        }
    }

    let remaining: Vec<C> = candidates
        .iter()
        .filter(|c| detected.as_ref() != Some(*c))
        .cloned()
        .collect();

    first_non_empty(&remaining, probe).await.ok_or_else(|| {
        FetchError::SchemaMismatch(format!("none of {:?} returned rows", candidates))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_USER_AGENT;
    use serde_json::json;
    use std::cell::RefCell;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_first_present_respects_priority() {
        let row = json!({ "arrival": "x", "arrival_time": "y" });
        assert_eq!(
            first_present(&row, FieldRole::Arrival.candidates()),
            Some("arrival_time".to_string())
        );
    }

    #[test]
    fn test_first_present_counts_null_keys() {
        let row = json!({ "departuretime": null });
        assert_eq!(
            first_present(&row, FieldRole::Departure.candidates()),
            Some("departuretime".to_string())
        );
        assert_eq!(first_value(&row, FieldRole::Departure.candidates()), None);
    }

    #[test]
    fn test_first_present_non_object() {
        assert_eq!(first_present(&json!([1, 2]), &["a"]), None);
    }

    #[tokio::test]
    async fn test_first_non_empty_short_circuits() {
        let calls = RefCell::new(Vec::new());
        let hit = first_non_empty(&["a", "b", "c"], |c| {
            calls.borrow_mut().push(c);
            async move {
                match c {
                    "a" => Err(FetchError::Transient("timeout".to_string())),
                    "b" => Ok(vec![1, 2]),
                    _ => Ok(vec![3]),
                }
            }
        })
        .await;

        assert_eq!(hit, Some(("b", vec![1, 2])));
        assert_eq!(*calls.borrow(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_resolve_prefers_detected_field() {
        let calls = RefCell::new(Vec::new());
        let (field, rows) = resolve_and_fetch(Some("b"), &["a", "b"], |c| {
            calls.borrow_mut().push(c);
            async move { Ok::<_, FetchError>(vec![c]) }
        })
        .await
        .unwrap();

        assert_eq!(field, "b");
        assert_eq!(rows, vec!["b"]);
        assert_eq!(*calls.borrow(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_resolve_falls_back_when_detected_is_sparse() {
        let calls = RefCell::new(Vec::new());
        let (field, _) = resolve_and_fetch(Some("b"), &["a", "b", "c"], |c| {
            calls.borrow_mut().push(c);
            async move {
                if c == "c" {
                    Ok(vec![1])
                } else {
                    Ok(Vec::new())
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(field, "c");
        // Detected "b" first, then the remaining candidates without repeating "b".
        assert_eq!(*calls.borrow(), vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_resolve_reports_schema_mismatch() {
        let err = resolve_and_fetch(None, &["a", "b"], |_| async {
            Ok::<Vec<u8>, FetchError>(Vec::new())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, FetchError::SchemaMismatch(_)));
    }

    #[tokio::test]
    async fn test_detect_from_sample_row() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 1,
                "results": [{ "deviceid": 1, "arrivaltime": "2019-01-01T10:00:00", "departure_time": null }]
            })))
            .mount(&server)
            .await;

        let client = OpenDataClient::new(&server.uri(), DEFAULT_USER_AGENT);
        let detected = detect(
            &client,
            "events",
            &[FieldRole::Arrival, FieldRole::Departure, FieldRole::Identifier],
            Duration::from_secs(15),
        )
        .await;

        assert_eq!(detected[&FieldRole::Arrival], Some("arrivaltime".to_string()));
        assert_eq!(detected[&FieldRole::Departure], Some("departure_time".to_string()));
        assert_eq!(detected[&FieldRole::Identifier], None);
    }

    #[tokio::test]
    async fn test_detect_on_failure_yields_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = OpenDataClient::new(&server.uri(), DEFAULT_USER_AGENT);
        let detected = detect(&client, "events", &[FieldRole::Arrival], Duration::from_secs(15)).await;
        assert_eq!(detected[&FieldRole::Arrival], None);
    }
}
