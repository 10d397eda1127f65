//! Source adapters and the stage order that is the source merge policy.
//!
//! Each stage fetches one upstream source and emits records containing only
//! the fields it owns. The updater runs the stages in the order returned by
//! [`default_stages`] and merges their output with last-writer-wins
//! deduplication, so that order *is* the merge policy — it decides which
//! source owns each column when two of them report it:
//!
//! 1. waves (Open-Meteo Marine): swell trains, surf range, wave energy, and
//!    wind direction (from the wind-wave train, the wave model's view of
//!    local wind) — wind direction is reserved here and not owned by any
//!    later stage;
//! 2. wind (Open-Meteo Forecast): wind speed and gusts;
//! 3. weather (Open-Meteo Forecast): temperature, pressure, weather code;
//! 4. tides (NOAA CO-OPS): tide level and water temperature.
//!
//! A stage that fails or returns nothing leaves earlier values untouched;
//! the updater logs it and moves on.

pub mod marine;
pub mod openmeteo;
pub mod rate_limit;
pub mod tides;
pub mod updater;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::config::AppConfig;
use crate::db::models::Spot;
use crate::errors::AppError;
use crate::record::{Field, ForecastRecord};

/// The half-open time range `[start, end)` a fetch covers.
#[derive(Debug, Clone, Copy)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One enrichment stage of the pipeline.
#[async_trait]
pub trait SourceStage: Send + Sync {
    fn name(&self) -> &'static str;

    /// The fields this stage is allowed to write. Emitting a record is
    /// restricted to these; everything else in it stays null.
    fn owned_fields(&self) -> &'static [Field];

    /// Fetch records for the given spots and window. Partial results are
    /// fine; an empty vec means the source contributed nothing this cycle.
    async fn fetch(
        &self,
        spots: &[Spot],
        window: FetchWindow,
    ) -> Result<Vec<ForecastRecord>, AppError>;
}

/// Build the stages in merge-policy order.
pub fn default_stages(config: &AppConfig) -> Vec<Box<dyn SourceStage>> {
    let marine = marine::MarineClient::new(&config.user_agent);
    let openmeteo = openmeteo::OpenMeteoClient::new(&config.user_agent);
    let tides = tides::TidesClient::new(&config.user_agent);

    vec![
        Box::new(marine::WaveStage::new(marine)),
        Box::new(openmeteo::WindStage::new(openmeteo.clone())),
        Box::new(openmeteo::WeatherStage::new(openmeteo)),
        Box::new(tides::TideStage::new(tides)),
    ]
}

/// Open-Meteo returns a bare object for a single location and an array for
/// a batched request; normalise both shapes to a vec.
pub(crate) fn parse_location_batch<T: DeserializeOwned>(
    value: serde_json::Value,
) -> Result<Vec<T>, AppError> {
    let items = match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| AppError::ExternalService(format!("response structure error: {}", e)))
        })
        .collect()
}

/// Parse Open-Meteo's hourly timestamps ("2026-02-01T17:00", UTC when the
/// request asks for timezone=UTC).
pub(crate) fn parse_hourly_time(s: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
        .ok()
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}
