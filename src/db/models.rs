use sqlx::FromRow;

/// A surf spot from the location registry. Coordinates are read-only from
/// the pipeline's perspective; this table is maintained elsewhere.
#[derive(Debug, Clone, FromRow)]
pub struct Spot {
    pub id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// NOAA CO-OPS station serving this spot, when one is assigned.
    pub tide_station_id: Option<String>,
}
