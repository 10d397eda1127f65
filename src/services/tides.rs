//! NOAA CO-OPS client — the tide/water-temperature source.
//!
//! Spots are assigned a CO-OPS station in the registry; each station is
//! fetched once per cycle and its series fan out to every spot it serves.
//! Spots without a station simply get no tide columns here and pick them
//! up from the neighbor fill instead.
//! See: https://api.tidesandcurrents.noaa.gov/api/prod/

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::header::USER_AGENT;
use serde::Deserialize;

use crate::db::models::Spot;
use crate::errors::AppError;
use crate::record::{Field, ForecastRecord};

use super::rate_limit::RateLimiter;
use super::{FetchWindow, SourceStage};

const COOPS_API_URL: &str = "https://api.tidesandcurrents.noaa.gov/api/prod/datagetter";

const REQUEST_DELAY_MS: u64 = 200;

/// Client for the CO-OPS data API.
#[derive(Debug, Clone)]
pub struct TidesClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    limiter: Arc<RateLimiter>,
}

// --- CO-OPS JSON response types ---

#[derive(Debug, Deserialize)]
struct PredictionsResponse {
    #[serde(default)]
    predictions: Vec<CoopsReading>,
}

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    #[serde(default)]
    data: Vec<CoopsReading>,
}

/// One reading: CO-OPS sends the timestamp as "2026-02-01 17:00" (GMT with
/// time_zone=gmt) and the value as a string, empty when the sensor gapped.
#[derive(Debug, Deserialize)]
struct CoopsReading {
    t: String,
    v: String,
}

fn parse_readings(readings: Vec<CoopsReading>) -> Vec<(DateTime<Utc>, f64)> {
    readings
        .into_iter()
        .filter_map(|reading| {
            let naive =
                chrono::NaiveDateTime::parse_from_str(&reading.t, "%Y-%m-%d %H:%M").ok()?;
            let value: f64 = reading.v.trim().parse().ok()?;
            Some((DateTime::from_naive_utc_and_offset(naive, Utc), value))
        })
        .collect()
}

impl TidesClient {
    pub fn new(user_agent: &str) -> Self {
        Self::with_base_url(COOPS_API_URL, user_agent)
    }

    pub fn with_base_url(base_url: &str, user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.to_string(),
            user_agent: user_agent.to_string(),
            limiter: Arc::new(RateLimiter::new(Duration::from_millis(REQUEST_DELAY_MS))),
        }
    }

    async fn fetch_product(
        &self,
        station: &str,
        window: FetchWindow,
        product: &str,
    ) -> Result<serde_json::Value, AppError> {
        self.limiter.acquire().await;

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("product", product.to_string()),
                ("station", station.to_string()),
                ("begin_date", window.start.format("%Y%m%d").to_string()),
                ("end_date", window.end.format("%Y%m%d").to_string()),
                ("datum", "MLLW".to_string()),
                ("units", "english".to_string()),
                ("time_zone", "gmt".to_string()),
                ("interval", "h".to_string()),
                ("format", "json".to_string()),
            ])
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("CO-OPS request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService(format!(
                "CO-OPS returned HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::ExternalService(format!("CO-OPS JSON parse error: {}", e)))
    }

    /// Hourly tide predictions (ft above MLLW) for a station.
    pub async fn fetch_predictions(
        &self,
        station: &str,
        window: FetchWindow,
    ) -> Result<Vec<(DateTime<Utc>, f64)>, AppError> {
        let raw = self.fetch_product(station, window, "predictions").await?;
        let parsed: PredictionsResponse = serde_json::from_value(raw).map_err(|e| {
            AppError::ExternalService(format!("CO-OPS predictions structure error: {}", e))
        })?;
        Ok(parse_readings(parsed.predictions))
    }

    /// Water temperature observations (°F) for a station. Observational, so
    /// only hours near the present have data — the rest is fill territory.
    pub async fn fetch_water_temperature(
        &self,
        station: &str,
        window: FetchWindow,
    ) -> Result<Vec<(DateTime<Utc>, f64)>, AppError> {
        let raw = self
            .fetch_product(station, window, "water_temperature")
            .await?;
        let parsed: ObservationsResponse = serde_json::from_value(raw).map_err(|e| {
            AppError::ExternalService(format!("CO-OPS water temp structure error: {}", e))
        })?;
        Ok(parse_readings(parsed.data))
    }
}

/// Tide/water-temperature enrichment stage — last in the merge policy.
pub struct TideStage {
    client: TidesClient,
}

const TIDE_FIELDS: [Field; 2] = [Field::TideLevelFt, Field::WaterTempF];

impl TideStage {
    pub fn new(client: TidesClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl SourceStage for TideStage {
    fn name(&self) -> &'static str {
        "tides"
    }

    fn owned_fields(&self) -> &'static [Field] {
        &TIDE_FIELDS
    }

    async fn fetch(
        &self,
        spots: &[Spot],
        window: FetchWindow,
    ) -> Result<Vec<ForecastRecord>, AppError> {
        // One fetch per station, fanned out to every spot it serves.
        let mut by_station: BTreeMap<String, Vec<&Spot>> = BTreeMap::new();
        for spot in spots {
            match &spot.tide_station_id {
                Some(station) => by_station.entry(station.clone()).or_default().push(spot),
                None => {
                    tracing::debug!("spot {} ({}) has no tide station assigned", spot.id, spot.name)
                }
            }
        }

        let client = &self.client;
        let fetches = by_station.keys().map(|station| {
            let station = station.clone();
            async move {
                let predictions = client.fetch_predictions(&station, window).await;
                let water_temps = client.fetch_water_temperature(&station, window).await;
                (station, predictions, water_temps)
            }
        });

        let mut records = Vec::new();

        for (station, predictions, water_temps) in join_all(fetches).await {
            let predictions = match predictions {
                Ok(series) => series,
                Err(e) => {
                    tracing::warn!("tide predictions unavailable for station {}: {}", station, e);
                    continue;
                }
            };
            let water_temps = match water_temps {
                Ok(series) => series,
                Err(e) => {
                    // Predictions alone are still worth writing.
                    tracing::warn!("water temp unavailable for station {}: {}", station, e);
                    Vec::new()
                }
            };

            let mut series: BTreeMap<DateTime<Utc>, (Option<f64>, Option<f64>)> = BTreeMap::new();
            for (ts, level) in predictions {
                series.entry(ts).or_default().0 = Some(level);
            }
            for (ts, temp) in water_temps {
                series.entry(ts).or_default().1 = Some(temp);
            }

            for spot in &by_station[&station] {
                for (&ts, &(tide_level_ft, water_temp_f)) in &series {
                    if ts < window.start || ts >= window.end {
                        continue;
                    }
                    let mut rec = ForecastRecord::new(spot.id, ts);
                    rec.tide_level_ft = tide_level_ft;
                    rec.water_temp_f = water_temp_f;
                    records.push(rec);
                }
            }
        }

        tracing::debug!(
            "tides: built {} records for {} stations",
            records.len(),
            by_station.len()
        );
        Ok(records)
    }
}
