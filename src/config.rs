use std::collections::HashSet;

use chrono::FixedOffset;

use crate::bucket::Cadence;
use crate::record::Field;

/// Fields where an exact zero is a valid reading (calm wind, north wind
/// direction, a 0.0 ft tide, a freezing morning, WMO clear-sky code 0) and
/// must never be stripped from an upsert payload as "no data".
const DEFAULT_ALLOW_ZERO: [Field; 6] = [
    Field::WindSpeedMph,
    Field::WindGustMph,
    Field::WindDirectionDeg,
    Field::TideLevelFt,
    Field::TemperatureF,
    Field::WeatherCode,
];

/// Application configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// User-Agent for outbound requests to Open-Meteo and NOAA CO-OPS.
    pub user_agent: String,
    pub port: u16,
    /// Forecast horizon fetched from the sources, in days.
    pub forecast_days: i64,
    /// Sleep between updater cycles, in seconds.
    pub update_interval_secs: u64,
    /// Bucket width for the gap-fill passes.
    pub fill_cadence: Cadence,
    /// Temporal fallback radius, in buckets.
    pub fill_window_buckets: u32,
    /// Fields the gap-fill passes attempt; defaults to every known field.
    pub fill_fields: Vec<Field>,
    /// Fields where zero survives the upsert payload zero-stripping.
    pub allow_zero_fields: HashSet<Field>,
    /// Civil-time origin for bucket alignment and the retention boundary.
    pub local_offset: FixedOffset,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            user_agent: std::env::var("USER_AGENT").unwrap_or_else(|_| {
                format!("surfcast-updater/{}", env!("CARGO_PKG_VERSION"))
            }),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("PORT must be a valid u16"),
            forecast_days: std::env::var("FORECAST_DAYS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .expect("FORECAST_DAYS must be a positive integer"),
            update_interval_secs: std::env::var("UPDATE_INTERVAL_SECS")
                .unwrap_or_else(|_| "10800".to_string())
                .parse()
                .expect("UPDATE_INTERVAL_SECS must be a positive integer"),
            fill_cadence: Cadence::parse(
                &std::env::var("FILL_CADENCE").unwrap_or_else(|_| "H".to_string()),
            )
            .expect("FILL_CADENCE must be \"H\" or \"3H\""),
            fill_window_buckets: std::env::var("FILL_WINDOW_BUCKETS")
                .unwrap_or_else(|_| "6".to_string())
                .parse()
                .expect("FILL_WINDOW_BUCKETS must be a non-negative integer"),
            fill_fields: parse_field_list(
                &std::env::var("FILL_FIELDS").unwrap_or_default(),
                &Field::ALL,
            ),
            allow_zero_fields: parse_field_list(
                &std::env::var("ALLOW_ZERO_FIELDS").unwrap_or_default(),
                &DEFAULT_ALLOW_ZERO,
            )
            .into_iter()
            .collect(),
            local_offset: offset_from_hours(
                std::env::var("LOCAL_UTC_OFFSET_HOURS")
                    .unwrap_or_else(|_| "-8".to_string())
                    .parse()
                    .expect("LOCAL_UTC_OFFSET_HOURS must be an integer"),
            ),
        }
    }
}

/// Parse a comma-separated field list; an empty string means `default`.
/// Unknown column names abort startup — a typo here would silently skip a
/// field for every subsequent cycle.
fn parse_field_list(raw: &str, default: &[Field]) -> Vec<Field> {
    if raw.trim().is_empty() {
        return default.to_vec();
    }
    raw.split(',')
        .map(|name| {
            let name = name.trim();
            Field::from_name(name)
                .unwrap_or_else(|| panic!("unknown forecast field in config: {:?}", name))
        })
        .collect()
}

fn offset_from_hours(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours * 3600)
        .expect("LOCAL_UTC_OFFSET_HOURS must be within -23..=23")
}
