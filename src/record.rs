//! The forecast record and its field catalogue.
//!
//! A record is identified by the natural key `(spot_id, timestamp)` and
//! carries one independently nullable column per forecast field. The
//! [`Field`] enum is the single catalogue of those columns: source stages,
//! the fill passes, deduplication, and the upsert builder all address
//! columns through it, so "does this record have field X" is a typed
//! question rather than a string lookup.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::collections::HashMap;

/// A scalar field value. Most columns are floating point; WMO weather codes
/// and the wave energy index are integers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Int(i32),
}

impl FieldValue {
    pub fn as_f64(self) -> f64 {
        match self {
            FieldValue::Float(v) => v,
            FieldValue::Int(v) => v as f64,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            FieldValue::Float(v) => v.round() as i32,
            FieldValue::Int(v) => v,
        }
    }

    /// Exact zero, used by the upsert payload zero-stripping rule.
    pub fn is_zero(self) -> bool {
        match self {
            FieldValue::Float(v) => v == 0.0,
            FieldValue::Int(v) => v == 0,
        }
    }
}

/// Every fillable forecast column. `ALL` lists them in processing order:
/// `surf_height_max_ft` comes before `surf_height_min_ft` because the
/// flat-day veto reads the maximum when deciding whether to fill the
/// minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    PrimarySwellHeightFt,
    PrimarySwellPeriodS,
    PrimarySwellDirectionDeg,
    SecondarySwellHeightFt,
    SecondarySwellPeriodS,
    SecondarySwellDirectionDeg,
    TertiarySwellHeightFt,
    TertiarySwellPeriodS,
    TertiarySwellDirectionDeg,
    SurfHeightMinFt,
    SurfHeightMaxFt,
    WaveEnergyKj,
    WindSpeedMph,
    WindDirectionDeg,
    WindGustMph,
    TemperatureF,
    PressureInhg,
    WeatherCode,
    WaterTempF,
    TideLevelFt,
}

impl Field {
    pub const ALL: [Field; 20] = [
        Field::PrimarySwellHeightFt,
        Field::PrimarySwellPeriodS,
        Field::PrimarySwellDirectionDeg,
        Field::SecondarySwellHeightFt,
        Field::SecondarySwellPeriodS,
        Field::SecondarySwellDirectionDeg,
        Field::TertiarySwellHeightFt,
        Field::TertiarySwellPeriodS,
        Field::TertiarySwellDirectionDeg,
        Field::SurfHeightMaxFt,
        Field::SurfHeightMinFt,
        Field::WaveEnergyKj,
        Field::WindSpeedMph,
        Field::WindDirectionDeg,
        Field::WindGustMph,
        Field::TemperatureF,
        Field::PressureInhg,
        Field::WeatherCode,
        Field::WaterTempF,
        Field::TideLevelFt,
    ];

    /// The database column name.
    pub fn as_str(self) -> &'static str {
        match self {
            Field::PrimarySwellHeightFt => "primary_swell_height_ft",
            Field::PrimarySwellPeriodS => "primary_swell_period_s",
            Field::PrimarySwellDirectionDeg => "primary_swell_direction_deg",
            Field::SecondarySwellHeightFt => "secondary_swell_height_ft",
            Field::SecondarySwellPeriodS => "secondary_swell_period_s",
            Field::SecondarySwellDirectionDeg => "secondary_swell_direction_deg",
            Field::TertiarySwellHeightFt => "tertiary_swell_height_ft",
            Field::TertiarySwellPeriodS => "tertiary_swell_period_s",
            Field::TertiarySwellDirectionDeg => "tertiary_swell_direction_deg",
            Field::SurfHeightMinFt => "surf_height_min_ft",
            Field::SurfHeightMaxFt => "surf_height_max_ft",
            Field::WaveEnergyKj => "wave_energy_kj",
            Field::WindSpeedMph => "wind_speed_mph",
            Field::WindDirectionDeg => "wind_direction_deg",
            Field::WindGustMph => "wind_gust_mph",
            Field::TemperatureF => "temperature_f",
            Field::PressureInhg => "pressure_inhg",
            Field::WeatherCode => "weather_code",
            Field::WaterTempF => "water_temp_f",
            Field::TideLevelFt => "tide_level_ft",
        }
    }

    /// Look a field up by its column name (used for env-configured lists).
    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

/// One forecast row, keyed by `(spot_id, timestamp)`.
///
/// In-memory pipelines may hold several records per key mid-flight (one per
/// source stage); the persisted table holds at most one, enforced by the
/// upsert conflict target.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ForecastRecord {
    pub spot_id: i64,
    pub timestamp: DateTime<Utc>,

    pub primary_swell_height_ft: Option<f64>,
    pub primary_swell_period_s: Option<f64>,
    pub primary_swell_direction_deg: Option<f64>,
    pub secondary_swell_height_ft: Option<f64>,
    pub secondary_swell_period_s: Option<f64>,
    pub secondary_swell_direction_deg: Option<f64>,
    pub tertiary_swell_height_ft: Option<f64>,
    pub tertiary_swell_period_s: Option<f64>,
    pub tertiary_swell_direction_deg: Option<f64>,
    pub surf_height_min_ft: Option<f64>,
    pub surf_height_max_ft: Option<f64>,
    pub wave_energy_kj: Option<i32>,
    pub wind_speed_mph: Option<f64>,
    pub wind_direction_deg: Option<f64>,
    pub wind_gust_mph: Option<f64>,
    pub temperature_f: Option<f64>,
    pub pressure_inhg: Option<f64>,
    pub weather_code: Option<i32>,
    pub water_temp_f: Option<f64>,
    pub tide_level_ft: Option<f64>,
}

impl ForecastRecord {
    /// An empty record for a key; stages fill in the fields they own.
    pub fn new(spot_id: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            spot_id,
            timestamp,
            primary_swell_height_ft: None,
            primary_swell_period_s: None,
            primary_swell_direction_deg: None,
            secondary_swell_height_ft: None,
            secondary_swell_period_s: None,
            secondary_swell_direction_deg: None,
            tertiary_swell_height_ft: None,
            tertiary_swell_period_s: None,
            tertiary_swell_direction_deg: None,
            surf_height_min_ft: None,
            surf_height_max_ft: None,
            wave_energy_kj: None,
            wind_speed_mph: None,
            wind_direction_deg: None,
            wind_gust_mph: None,
            temperature_f: None,
            pressure_inhg: None,
            weather_code: None,
            water_temp_f: None,
            tide_level_ft: None,
        }
    }

    pub fn key(&self) -> (i64, DateTime<Utc>) {
        (self.spot_id, self.timestamp)
    }

    pub fn get(&self, field: Field) -> Option<FieldValue> {
        match field {
            Field::PrimarySwellHeightFt => self.primary_swell_height_ft.map(FieldValue::Float),
            Field::PrimarySwellPeriodS => self.primary_swell_period_s.map(FieldValue::Float),
            Field::PrimarySwellDirectionDeg => {
                self.primary_swell_direction_deg.map(FieldValue::Float)
            }
            Field::SecondarySwellHeightFt => self.secondary_swell_height_ft.map(FieldValue::Float),
            Field::SecondarySwellPeriodS => self.secondary_swell_period_s.map(FieldValue::Float),
            Field::SecondarySwellDirectionDeg => {
                self.secondary_swell_direction_deg.map(FieldValue::Float)
            }
            Field::TertiarySwellHeightFt => self.tertiary_swell_height_ft.map(FieldValue::Float),
            Field::TertiarySwellPeriodS => self.tertiary_swell_period_s.map(FieldValue::Float),
            Field::TertiarySwellDirectionDeg => {
                self.tertiary_swell_direction_deg.map(FieldValue::Float)
            }
            Field::SurfHeightMinFt => self.surf_height_min_ft.map(FieldValue::Float),
            Field::SurfHeightMaxFt => self.surf_height_max_ft.map(FieldValue::Float),
            Field::WaveEnergyKj => self.wave_energy_kj.map(FieldValue::Int),
            Field::WindSpeedMph => self.wind_speed_mph.map(FieldValue::Float),
            Field::WindDirectionDeg => self.wind_direction_deg.map(FieldValue::Float),
            Field::WindGustMph => self.wind_gust_mph.map(FieldValue::Float),
            Field::TemperatureF => self.temperature_f.map(FieldValue::Float),
            Field::PressureInhg => self.pressure_inhg.map(FieldValue::Float),
            Field::WeatherCode => self.weather_code.map(FieldValue::Int),
            Field::WaterTempF => self.water_temp_f.map(FieldValue::Float),
            Field::TideLevelFt => self.tide_level_ft.map(FieldValue::Float),
        }
    }

    /// Set a field, coercing the value to the column's native kind.
    pub fn set(&mut self, field: Field, value: FieldValue) {
        match field {
            Field::PrimarySwellHeightFt => self.primary_swell_height_ft = Some(value.as_f64()),
            Field::PrimarySwellPeriodS => self.primary_swell_period_s = Some(value.as_f64()),
            Field::PrimarySwellDirectionDeg => {
                self.primary_swell_direction_deg = Some(value.as_f64())
            }
            Field::SecondarySwellHeightFt => self.secondary_swell_height_ft = Some(value.as_f64()),
            Field::SecondarySwellPeriodS => self.secondary_swell_period_s = Some(value.as_f64()),
            Field::SecondarySwellDirectionDeg => {
                self.secondary_swell_direction_deg = Some(value.as_f64())
            }
            Field::TertiarySwellHeightFt => self.tertiary_swell_height_ft = Some(value.as_f64()),
            Field::TertiarySwellPeriodS => self.tertiary_swell_period_s = Some(value.as_f64()),
            Field::TertiarySwellDirectionDeg => {
                self.tertiary_swell_direction_deg = Some(value.as_f64())
            }
            Field::SurfHeightMinFt => self.surf_height_min_ft = Some(value.as_f64()),
            Field::SurfHeightMaxFt => self.surf_height_max_ft = Some(value.as_f64()),
            Field::WaveEnergyKj => self.wave_energy_kj = Some(value.as_i32()),
            Field::WindSpeedMph => self.wind_speed_mph = Some(value.as_f64()),
            Field::WindDirectionDeg => self.wind_direction_deg = Some(value.as_f64()),
            Field::WindGustMph => self.wind_gust_mph = Some(value.as_f64()),
            Field::TemperatureF => self.temperature_f = Some(value.as_f64()),
            Field::PressureInhg => self.pressure_inhg = Some(value.as_f64()),
            Field::WeatherCode => self.weather_code = Some(value.as_i32()),
            Field::WaterTempF => self.water_temp_f = Some(value.as_f64()),
            Field::TideLevelFt => self.tide_level_ft = Some(value.as_f64()),
        }
    }
}

/// Normalise a longitude to signed degrees (−180..180].
///
/// The wave-model grid uses 0..360; the spot registry uses signed degrees.
/// All coordinates are converted here, at the boundary, before any distance
/// is computed.
pub fn normalize_longitude(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

/// Read-only map of spot id → (lat, lon), loaded once per pipeline cycle.
#[derive(Debug, Clone, Default)]
pub struct SpotRegistry {
    coords: HashMap<i64, (f64, f64)>,
}

impl SpotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a spot. Non-finite coordinates are rejected; longitudes are
    /// normalised to signed degrees.
    pub fn insert(&mut self, spot_id: i64, latitude: f64, longitude: f64) {
        if latitude.is_finite() && longitude.is_finite() {
            self.coords
                .insert(spot_id, (latitude, normalize_longitude(longitude)));
        }
    }

    pub fn get(&self, spot_id: i64) -> Option<(f64, f64)> {
        self.coords.get(&spot_id).copied()
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}
