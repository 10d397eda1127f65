//! Open-Meteo Forecast API client — the atmospheric source.
//!
//! Serves two distinct merge-policy stages from one endpoint: the wind
//! stage (speed and gusts) and the weather stage (temperature, pressure,
//! WMO weather code). Wind *direction* is deliberately not fetched here —
//! that column belongs to the wave source and must survive even when this
//! source is down. See: https://open-meteo.com/en/docs

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::USER_AGENT;
use serde::Deserialize;

use crate::db::models::Spot;
use crate::errors::AppError;
use crate::helpers::{celsius_to_fahrenheit, hpa_to_inhg, kmh_to_mph};
use crate::record::{Field, ForecastRecord};

use super::rate_limit::RateLimiter;
use super::{parse_hourly_time, parse_location_batch, FetchWindow, SourceStage};

const FORECAST_API_URL: &str = "https://api.open-meteo.com/v1/forecast";

const LOCATION_BATCH: usize = 10;
const REQUEST_DELAY_MS: u64 = 1000;

const WIND_VARS: &str = "wind_speed_10m,wind_gusts_10m";
const WEATHER_VARS: &str = "temperature_2m,surface_pressure,weather_code";

/// Client for the Open-Meteo Forecast API. Cheap to clone; the rate
/// limiter is shared so both stages pace against the same budget.
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    limiter: Arc<RateLimiter>,
}

// --- Open-Meteo Forecast JSON response types ---

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    hourly: ForecastHourly,
}

#[derive(Debug, Deserialize)]
struct ForecastHourly {
    time: Vec<String>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    surface_pressure: Vec<Option<f64>>,
    #[serde(default)]
    weather_code: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m: Vec<Option<f64>>,
    #[serde(default)]
    wind_gusts_10m: Vec<Option<f64>>,
}

impl ForecastHourly {
    fn at(values: &[Option<f64>], i: usize) -> Option<f64> {
        values.get(i).copied().flatten()
    }
}

impl OpenMeteoClient {
    pub fn new(user_agent: &str) -> Self {
        Self::with_base_url(FORECAST_API_URL, user_agent)
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

    async fn fetch_batch(
        &self,
        spots: &[Spot],
        window: FetchWindow,
        hourly_vars: &str,
    ) -> Result<Vec<ForecastResponse>, AppError> {
        self.limiter.acquire().await;

        let latitudes: Vec<String> = spots.iter().map(|s| format!("{:.4}", s.latitude)).collect();
        let longitudes: Vec<String> = spots.iter().map(|s| format!("{:.4}", s.longitude)).collect();

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", latitudes.join(",")),
                ("longitude", longitudes.join(",")),
                ("hourly", hourly_vars.to_string()),
                ("start_date", window.start.format("%Y-%m-%d").to_string()),
                ("end_date", window.end.format("%Y-%m-%d").to_string()),
                ("timezone", "UTC".to_string()),
            ])
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("open-meteo request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService(format!(
                "open-meteo returned HTTP {}",
                response.status()
            )));
        }

        let raw: serde_json::Value = response.json().await.map_err(|e| {
            AppError::ExternalService(format!("open-meteo JSON parse error: {}", e))
        })?;

        parse_location_batch(raw)
    }

    async fn fetch_stage(
        &self,
        spots: &[Spot],
        window: FetchWindow,
        hourly_vars: &str,
        build: impl Fn(&Spot, &ForecastHourly, usize) -> Option<ForecastRecord>,
    ) -> Result<Vec<ForecastRecord>, AppError> {
        let mut records = Vec::new();

        for chunk in spots.chunks(LOCATION_BATCH) {
            let responses = self.fetch_batch(chunk, window, hourly_vars).await?;
            if responses.len() != chunk.len() {
                return Err(AppError::ExternalService(format!(
                    "open-meteo returned {} locations for {} requested",
                    responses.len(),
                    chunk.len()
                )));
            }
            for (spot, response) in chunk.iter().zip(responses) {
                for (i, raw_time) in response.hourly.time.iter().enumerate() {
                    let Some(ts) = parse_hourly_time(raw_time) else {
                        continue;
                    };
                    if ts < window.start || ts >= window.end {
                        continue;
                    }
                    if let Some(mut rec) = build(spot, &response.hourly, i) {
                        rec.timestamp = ts;
                        records.push(rec);
                    }
                }
            }
        }

        Ok(records)
    }
}

/// Wind enrichment stage — second in the merge policy.
pub struct WindStage {
    client: OpenMeteoClient,
}

const WIND_FIELDS: [Field; 2] = [Field::WindSpeedMph, Field::WindGustMph];

impl WindStage {
    pub fn new(client: OpenMeteoClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl SourceStage for WindStage {
    fn name(&self) -> &'static str {
        "wind"
    }

    fn owned_fields(&self) -> &'static [Field] {
        &WIND_FIELDS
    }

    async fn fetch(
        &self,
        spots: &[Spot],
        window: FetchWindow,
    ) -> Result<Vec<ForecastRecord>, AppError> {
        let records = self
            .client
            .fetch_stage(spots, window, WIND_VARS, |spot, hourly, i| {
                let mut rec = ForecastRecord::new(spot.id, window.start);
                rec.wind_speed_mph = kmh_to_mph(ForecastHourly::at(&hourly.wind_speed_10m, i));
                rec.wind_gust_mph = kmh_to_mph(ForecastHourly::at(&hourly.wind_gusts_10m, i));
                Some(rec)
            })
            .await?;

        tracing::debug!("wind: built {} records for {} spots", records.len(), spots.len());
        Ok(records)
    }
}

/// Weather enrichment stage — third in the merge policy.
pub struct WeatherStage {
    client: OpenMeteoClient,
}

const WEATHER_FIELDS: [Field; 3] = [
    Field::TemperatureF,
    Field::PressureInhg,
    Field::WeatherCode,
];

impl WeatherStage {
    pub fn new(client: OpenMeteoClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl SourceStage for WeatherStage {
    fn name(&self) -> &'static str {
        "weather"
    }

    fn owned_fields(&self) -> &'static [Field] {
        &WEATHER_FIELDS
    }

    async fn fetch(
        &self,
        spots: &[Spot],
        window: FetchWindow,
    ) -> Result<Vec<ForecastRecord>, AppError> {
        let records = self
            .client
            .fetch_stage(spots, window, WEATHER_VARS, |spot, hourly, i| {
                let mut rec = ForecastRecord::new(spot.id, window.start);
                rec.temperature_f =
                    celsius_to_fahrenheit(ForecastHourly::at(&hourly.temperature_2m, i));
                rec.pressure_inhg = hpa_to_inhg(ForecastHourly::at(&hourly.surface_pressure, i));
                rec.weather_code =
                    ForecastHourly::at(&hourly.weather_code, i).map(|c| c.round() as i32);
                Some(rec)
            })
            .await?;

        tracing::debug!(
            "weather: built {} records for {} spots",
            records.len(),
            spots.len()
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spot(id: i64) -> Spot {
        Spot {
            id,
            name: format!("spot-{}", id),
            latitude: 33.62,
            longitude: -117.93,
            tide_station_id: None,
        }
    }

    fn window() -> FetchWindow {
        FetchWindow {
            start: "2026-02-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap(),
            end: "2026-02-02T00:00:00Z".parse::<DateTime<Utc>>().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_wind_stage_converts_and_owns_only_wind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("hourly", WIND_VARS))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "hourly": {
                    "time": ["2026-02-01T00:00"],
                    "wind_speed_10m": [10.0],
                    "wind_gusts_10m": [0.0]
                }
            })))
            .mount(&server)
            .await;

        let client =
            OpenMeteoClient::with_base_url(&format!("{}/v1/forecast", server.uri()), "test-agent");
        let stage = WindStage::new(client);

        let records = stage.fetch(&[spot(1)], window()).await.unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert!((rec.wind_speed_mph.unwrap() - 6.21371).abs() < 1e-4);
        // A zero gust is calm wind, and it arrives as 0.0, not None.
        assert_eq!(rec.wind_gust_mph, Some(0.0));
        // Wind direction is reserved to the wave stage.
        assert_eq!(rec.wind_direction_deg, None);
        for field in Field::ALL {
            if !WIND_FIELDS.contains(&field) {
                assert_eq!(rec.get(field), None, "wind stage must not write {:?}", field);
            }
        }
    }

    #[tokio::test]
    async fn test_weather_stage_converts_units() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("hourly", WEATHER_VARS))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "hourly": {
                    "time": ["2026-02-01T00:00", "2026-02-01T01:00"],
                    "temperature_2m": [20.0, null],
                    "surface_pressure": [1013.25, 1010.0],
                    "weather_code": [61, 3]
                }
            })))
            .mount(&server)
            .await;

        let client =
            OpenMeteoClient::with_base_url(&format!("{}/v1/forecast", server.uri()), "test-agent");
        let stage = WeatherStage::new(client);

        let records = stage.fetch(&[spot(1)], window()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].temperature_f, Some(68.0));
        assert!((records[0].pressure_inhg.unwrap() - 29.92).abs() < 0.01);
        assert_eq!(records[0].weather_code, Some(61));
        // Null temperature stays absent while the other fields land.
        assert_eq!(records[1].temperature_f, None);
        assert_eq!(records[1].weather_code, Some(3));
    }

    #[tokio::test]
    async fn test_batched_spots_map_back_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "hourly": {
                        "time": ["2026-02-01T00:00"],
                        "wind_speed_10m": [10.0],
                        "wind_gusts_10m": [20.0]
                    }
                },
                {
                    "hourly": {
                        "time": ["2026-02-01T00:00"],
                        "wind_speed_10m": [30.0],
                        "wind_gusts_10m": [40.0]
                    }
                }
            ])))
            .mount(&server)
            .await;

        let client =
            OpenMeteoClient::with_base_url(&format!("{}/v1/forecast", server.uri()), "test-agent");
        let stage = WindStage::new(client);

        let records = stage.fetch(&[spot(1), spot(2)], window()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].spot_id, 1);
        assert_eq!(records[1].spot_id, 2);
        assert!(records[1].wind_speed_mph.unwrap() > records[0].wind_speed_mph.unwrap());
    }

    #[tokio::test]
    async fn test_location_count_mismatch_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "hourly": { "time": [] }
            })))
            .mount(&server)
            .await;

        let client =
            OpenMeteoClient::with_base_url(&format!("{}/v1/forecast", server.uri()), "test-agent");
        let stage = WindStage::new(client);

        let result = stage.fetch(&[spot(1), spot(2)], window()).await;
        assert!(matches!(result, Err(AppError::ExternalService(_))));
    }
}
