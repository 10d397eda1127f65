//! Open-Meteo Marine API client — the wave/swell source.
//!
//! Supplies the ranked swell trains (primary = dominant swell, secondary =
//! secondary swell, tertiary = local wind waves), the derived surf height
//! range and wave-energy index, and wind direction taken from the wind-wave
//! train. See: https://open-meteo.com/en/docs/marine-weather-api

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::USER_AGENT;
use serde::Deserialize;

use crate::db::models::Spot;
use crate::errors::AppError;
use crate::helpers::{meters_to_feet, normalize_surf_range, wave_energy_index};
use crate::record::{Field, ForecastRecord};

use super::rate_limit::RateLimiter;
use super::{parse_hourly_time, parse_location_batch, FetchWindow, SourceStage};

const MARINE_API_URL: &str = "https://marine-api.open-meteo.com/v1/marine";

/// Locations per request; Open-Meteo accepts comma-separated coordinates.
const LOCATION_BATCH: usize = 10;

/// Minimum gap between requests (free-tier politeness).
const REQUEST_DELAY_MS: u64 = 1000;

const HOURLY_VARS: &str = "wave_height,\
swell_wave_height,swell_wave_period,swell_wave_direction,\
secondary_swell_wave_height,secondary_swell_wave_period,secondary_swell_wave_direction,\
wind_wave_height,wind_wave_period,wind_wave_direction";

/// Surf height range as a fraction of combined wave height: sets typically
/// break between three-quarters and one-and-a-quarter of the face height.
const SURF_RANGE_LOW: f64 = 0.75;
const SURF_RANGE_HIGH: f64 = 1.25;

/// Client for the Open-Meteo Marine API.
#[derive(Debug, Clone)]
pub struct MarineClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    limiter: Arc<RateLimiter>,
}

// --- Open-Meteo Marine JSON response types ---

#[derive(Debug, Deserialize)]
struct MarineResponse {
    hourly: MarineHourly,
}

#[derive(Debug, Deserialize)]
struct MarineHourly {
    time: Vec<String>,
    #[serde(default)]
    wave_height: Vec<Option<f64>>,
    #[serde(default)]
    swell_wave_height: Vec<Option<f64>>,
    #[serde(default)]
    swell_wave_period: Vec<Option<f64>>,
    #[serde(default)]
    swell_wave_direction: Vec<Option<f64>>,
    #[serde(default)]
    secondary_swell_wave_height: Vec<Option<f64>>,
    #[serde(default)]
    secondary_swell_wave_period: Vec<Option<f64>>,
    #[serde(default)]
    secondary_swell_wave_direction: Vec<Option<f64>>,
    #[serde(default)]
    wind_wave_height: Vec<Option<f64>>,
    #[serde(default)]
    wind_wave_period: Vec<Option<f64>>,
    #[serde(default)]
    wind_wave_direction: Vec<Option<f64>>,
}

impl MarineHourly {
    fn at(values: &[Option<f64>], i: usize) -> Option<f64> {
        values.get(i).copied().flatten()
    }
}

impl MarineClient {
    pub fn new(user_agent: &str) -> Self {
        Self::with_base_url(MARINE_API_URL, user_agent)
    }

    /// Construct against an alternate endpoint (tests point this at a mock
    /// server).
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

    /// Fetch the hourly marine timeseries for up to [`LOCATION_BATCH`]
    /// spots in one request. Responses come back in request order.
    async fn fetch_batch(
        &self,
        spots: &[Spot],
        window: FetchWindow,
    ) -> Result<Vec<MarineResponse>, AppError> {
        self.limiter.acquire().await;

        let latitudes: Vec<String> = spots.iter().map(|s| format!("{:.4}", s.latitude)).collect();
        let longitudes: Vec<String> = spots.iter().map(|s| format!("{:.4}", s.longitude)).collect();

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", latitudes.join(",")),
                ("longitude", longitudes.join(",")),
                ("hourly", HOURLY_VARS.to_string()),
                ("start_date", window.start.format("%Y-%m-%d").to_string()),
                ("end_date", window.end.format("%Y-%m-%d").to_string()),
                ("timezone", "UTC".to_string()),
            ])
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("marine request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService(format!(
                "marine API returned HTTP {}",
                response.status()
            )));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::ExternalService(format!("marine JSON parse error: {}", e)))?;

        parse_location_batch(raw)
    }
}

/// Wave/swell enrichment stage — first in the merge policy.
pub struct WaveStage {
    client: MarineClient,
}

const WAVE_FIELDS: [Field; 13] = [
    Field::PrimarySwellHeightFt,
    Field::PrimarySwellPeriodS,
    Field::PrimarySwellDirectionDeg,
    Field::SecondarySwellHeightFt,
    Field::SecondarySwellPeriodS,
    Field::SecondarySwellDirectionDeg,
    Field::TertiarySwellHeightFt,
    Field::TertiarySwellPeriodS,
    Field::TertiarySwellDirectionDeg,
    Field::SurfHeightMinFt,
    Field::SurfHeightMaxFt,
    Field::WaveEnergyKj,
    Field::WindDirectionDeg,
];

impl WaveStage {
    pub fn new(client: MarineClient) -> Self {
        Self { client }
    }

    fn records_for_spot(
        spot: &Spot,
        hourly: &MarineHourly,
        window: FetchWindow,
    ) -> Vec<ForecastRecord> {
        let mut records = Vec::with_capacity(hourly.time.len());

        for (i, raw_time) in hourly.time.iter().enumerate() {
            let Some(ts) = parse_hourly_time(raw_time) else {
                continue;
            };
            if ts < window.start || ts >= window.end {
                continue;
            }

            let mut rec = ForecastRecord::new(spot.id, ts);

            rec.primary_swell_height_ft = meters_to_feet(MarineHourly::at(&hourly.swell_wave_height, i));
            rec.primary_swell_period_s = MarineHourly::at(&hourly.swell_wave_period, i);
            rec.primary_swell_direction_deg = MarineHourly::at(&hourly.swell_wave_direction, i);

            rec.secondary_swell_height_ft =
                meters_to_feet(MarineHourly::at(&hourly.secondary_swell_wave_height, i));
            rec.secondary_swell_period_s = MarineHourly::at(&hourly.secondary_swell_wave_period, i);
            rec.secondary_swell_direction_deg =
                MarineHourly::at(&hourly.secondary_swell_wave_direction, i);

            // Local wind waves ride along as the third train.
            rec.tertiary_swell_height_ft =
                meters_to_feet(MarineHourly::at(&hourly.wind_wave_height, i));
            rec.tertiary_swell_period_s = MarineHourly::at(&hourly.wind_wave_period, i);
            rec.tertiary_swell_direction_deg =
                MarineHourly::at(&hourly.wind_wave_direction, i);

            // Wind-wave direction doubles as the wave model's wind direction.
            rec.wind_direction_deg = MarineHourly::at(&hourly.wind_wave_direction, i);

            if let Some(face_ft) = meters_to_feet(MarineHourly::at(&hourly.wave_height, i)) {
                let (lo, hi) =
                    normalize_surf_range(face_ft * SURF_RANGE_LOW, face_ft * SURF_RANGE_HIGH);
                rec.surf_height_min_ft = Some(lo);
                rec.surf_height_max_ft = Some(hi);
            }

            rec.wave_energy_kj =
                wave_energy_index(rec.primary_swell_height_ft, rec.primary_swell_period_s);

            records.push(rec);
        }

        records
    }
}

#[async_trait::async_trait]
impl SourceStage for WaveStage {
    fn name(&self) -> &'static str {
        "waves"
    }

    fn owned_fields(&self) -> &'static [Field] {
        &WAVE_FIELDS
    }

    async fn fetch(
        &self,
        spots: &[Spot],
        window: FetchWindow,
    ) -> Result<Vec<ForecastRecord>, AppError> {
        let mut records = Vec::new();

        for chunk in spots.chunks(LOCATION_BATCH) {
            let responses = self.client.fetch_batch(chunk, window).await?;
            if responses.len() != chunk.len() {
                return Err(AppError::ExternalService(format!(
                    "marine API returned {} locations for {} requested",
                    responses.len(),
                    chunk.len()
                )));
            }
            for (spot, response) in chunk.iter().zip(responses) {
                records.extend(Self::records_for_spot(spot, &response.hourly, window));
            }
        }

        tracing::debug!("waves: built {} records for {} spots", records.len(), spots.len());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spot(id: i64, lat: f64, lon: f64) -> Spot {
        Spot {
            id,
            name: format!("spot-{}", id),
            latitude: lat,
            longitude: lon,
            tide_station_id: None,
        }
    }

    fn window(start: &str, end: &str) -> FetchWindow {
        FetchWindow {
            start: start.parse::<DateTime<Utc>>().unwrap(),
            end: end.parse::<DateTime<Utc>>().unwrap(),
        }
    }

    fn hourly_fixture() -> serde_json::Value {
        serde_json::json!({
            "time": ["2026-02-01T00:00", "2026-02-01T01:00"],
            "wave_height": [1.0, 2.0],
            "swell_wave_height": [1.0, null],
            "swell_wave_period": [14.0, 15.0],
            "swell_wave_direction": [280.0, 281.0],
            "secondary_swell_wave_height": [0.5, 0.5],
            "secondary_swell_wave_period": [8.0, 8.0],
            "secondary_swell_wave_direction": [200.0, 200.0],
            "wind_wave_height": [0.3, 0.4],
            "wind_wave_period": [4.0, 4.0],
            "wind_wave_direction": [315.0, 310.0]
        })
    }

    #[tokio::test]
    async fn test_fetch_builds_converted_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/marine"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "hourly": hourly_fixture() })),
            )
            .mount(&server)
            .await;

        let client =
            MarineClient::with_base_url(&format!("{}/v1/marine", server.uri()), "test-agent");
        let stage = WaveStage::new(client);

        let spots = vec![spot(1, 33.62, -117.93)];
        let records = stage
            .fetch(&spots, window("2026-02-01T00:00:00Z", "2026-02-02T00:00:00Z"))
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.spot_id, 1);
        // 1.0 m swell -> 3.28 ft
        assert!((first.primary_swell_height_ft.unwrap() - 3.28084).abs() < 1e-4);
        assert_eq!(first.primary_swell_period_s, Some(14.0));
        // Wind direction borrowed from the wind-wave train
        assert_eq!(first.wind_direction_deg, Some(315.0));
        // Surf range from 1.0 m face: 0.75x..1.25x of 3.28 ft
        assert!((first.surf_height_min_ft.unwrap() - 2.46063).abs() < 1e-3);
        assert!((first.surf_height_max_ft.unwrap() - 4.10105).abs() < 1e-3);
        assert!(first.wave_energy_kj.is_some());

        // Null swell height at 01:00 stays absent, and so does the energy
        let second = &records[1];
        assert_eq!(second.primary_swell_height_ft, None);
        assert_eq!(second.wave_energy_kj, None);
    }

    #[tokio::test]
    async fn test_fetch_filters_to_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/marine"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "hourly": hourly_fixture() })),
            )
            .mount(&server)
            .await;

        let client =
            MarineClient::with_base_url(&format!("{}/v1/marine", server.uri()), "test-agent");
        let stage = WaveStage::new(client);

        let spots = vec![spot(1, 33.62, -117.93)];
        let records = stage
            .fetch(&spots, window("2026-02-01T01:00:00Z", "2026-02-02T00:00:00Z"))
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].timestamp,
            "2026-02-01T01:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_http_error_is_external_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/marine"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client =
            MarineClient::with_base_url(&format!("{}/v1/marine", server.uri()), "test-agent");
        let stage = WaveStage::new(client);

        let result = stage
            .fetch(
                &[spot(1, 33.62, -117.93)],
                window("2026-02-01T00:00:00Z", "2026-02-02T00:00:00Z"),
            )
            .await;
        assert!(matches!(result, Err(AppError::ExternalService(_))));
    }

    #[test]
    fn test_stage_never_sets_unowned_fields() {
        let hourly: MarineHourly =
            serde_json::from_value(hourly_fixture()).expect("fixture parses");
        let records = WaveStage::records_for_spot(
            &spot(1, 33.0, -117.0),
            &hourly,
            window("2026-02-01T00:00:00Z", "2026-02-02T00:00:00Z"),
        );
        for rec in &records {
            for field in Field::ALL {
                if !WAVE_FIELDS.contains(&field) {
                    assert_eq!(
                        rec.get(field),
                        None,
                        "wave stage must not write {:?}",
                        field
                    );
                }
            }
        }
    }
}
