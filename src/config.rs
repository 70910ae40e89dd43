use std::time::Duration;

/// Lower bound of the per-request upstream timeout band (seconds).
const MIN_FETCH_TIMEOUT_SECS: u64 = 15;
/// Upper bound of the per-request upstream timeout band (seconds).
const MAX_FETCH_TIMEOUT_SECS: u64 = 30;

/// `User-Agent` sent to the open-data portal unless `OPEN_DATA_USER_AGENT` is set.
pub const DEFAULT_USER_AGENT: &str = "kerbside-api/0.1";

/// Dataset identifiers and field names on the open-data portal.
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    /// Live bay-sensor feed (one row per sensor, current status).
    pub live_sensors: String,
    /// Annual arrival/departure event datasets, tried in order.
    pub annual_events: Vec<String>,
    /// Pedestrian counting sensor locations.
    pub pedestrian_locations: String,
    /// Hourly pedestrian counts per sensor.
    pub pedestrian_counts: String,
    /// Name of the geo-point column used for spatial predicates.
    pub geo_field: String,
}

/// Application configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub open_data_base_url: String,
    pub user_agent: String,
    pub datasets: DatasetConfig,
    pub live_fetch_timeout: Duration,
    pub history_fetch_timeout: Duration,
    /// Hex resolution used when a request does not name one.
    pub default_resolution: u8,
    /// Fixed offset of the feeds' local clock from UTC, in hours.
    pub local_utc_offset_hours: i32,
    /// Year whose annual event data backs historical lookups.
    pub history_year: i32,
    pub history_window_days: i64,
    pub ts_retention_days: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("PORT must be a valid u16"),
            open_data_base_url: std::env::var("OPEN_DATA_BASE_URL").unwrap_or_else(|_| {
                "https://data.melbourne.vic.gov.au/api/explore/v2.1".to_string()
            }),
            user_agent: env_or("OPEN_DATA_USER_AGENT", DEFAULT_USER_AGENT),
            datasets: DatasetConfig {
                live_sensors: env_or(
                    "LIVE_SENSOR_DATASET",
                    "on-street-parking-bay-sensors",
                ),
                annual_events: parse_list(&env_or(
                    "ANNUAL_SENSOR_DATASETS",
                    "on-street-car-parking-sensor-data-2019,on-street-car-parking-sensor-data-2020-jan-may",
                )),
                pedestrian_locations: env_or(
                    "PEDESTRIAN_LOCATIONS_DATASET",
                    "pedestrian-counting-system-sensor-locations",
                ),
                pedestrian_counts: env_or(
                    "PEDESTRIAN_COUNTS_DATASET",
                    "pedestrian-counting-system-monthly-counts-per-hour",
                ),
                geo_field: env_or("GEO_FIELD", "location"),
            },
            live_fetch_timeout: timeout_secs(env_parse("LIVE_FETCH_TIMEOUT_SECS", 15)),
            history_fetch_timeout: timeout_secs(env_parse("HISTORY_FETCH_TIMEOUT_SECS", 30)),
            default_resolution: env_parse("DEFAULT_RESOLUTION", 9u8).min(15),
            local_utc_offset_hours: env_parse("LOCAL_UTC_OFFSET_HOURS", 10),
            history_year: env_parse("HISTORY_YEAR", 2019),
            history_window_days: env_parse("HISTORY_WINDOW_DAYS", 28i64).max(1),
            ts_retention_days: env_parse("TS_RETENTION_DAYS", 30i64).max(1),
        }
    }
}

#[cfg(test)]
impl AppConfig {
    /// Fixed configuration against a mock upstream, independent of the environment.
    pub(crate) fn for_base_url(base_url: &str) -> Self {
        Self {
            port: 0,
            open_data_base_url: base_url.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            datasets: DatasetConfig {
                live_sensors: "bays".to_string(),
                annual_events: vec!["events-2019".to_string(), "events-2020".to_string()],
                pedestrian_locations: "ped-locations".to_string(),
                pedestrian_counts: "ped-counts".to_string(),
                geo_field: "location".to_string(),
            },
            live_fetch_timeout: Duration::from_secs(MIN_FETCH_TIMEOUT_SECS),
            history_fetch_timeout: Duration::from_secs(MIN_FETCH_TIMEOUT_SECS),
            default_resolution: 9,
            local_utc_offset_hours: 10,
            history_year: 2019,
            history_window_days: 7,
            ts_retention_days: 30,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring unparseable {}={:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Clamp a configured timeout into the 15–30 s band every upstream call uses.
fn timeout_secs(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(MIN_FETCH_TIMEOUT_SECS, MAX_FETCH_TIMEOUT_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        // NOTE: set_var/remove_var is process-global. Only this test touches
        // these variables, so parallel test threads do not race on them.
        unsafe {
            std::env::remove_var("PORT");
            std::env::remove_var("ANNUAL_SENSOR_DATASETS");
            std::env::remove_var("LIVE_FETCH_TIMEOUT_SECS");
            std::env::remove_var("HISTORY_FETCH_TIMEOUT_SECS");
            std::env::remove_var("DEFAULT_RESOLUTION");
        }

        let config = AppConfig::from_env();

        assert_eq!(config.port, 8080);
        assert_eq!(config.datasets.annual_events.len(), 2);
        assert_eq!(config.live_fetch_timeout, Duration::from_secs(15));
        assert_eq!(config.history_fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.default_resolution, 9);
    }

    #[test]
    fn test_timeout_clamped_to_band() {
        assert_eq!(timeout_secs(1), Duration::from_secs(15));
        assert_eq!(timeout_secs(20), Duration::from_secs(20));
        assert_eq!(timeout_secs(600), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_list_skips_blanks() {
        assert_eq!(
            parse_list(" a, ,b ,"),
            vec!["a".to_string(), "b".to_string()]
        );
    }
}
