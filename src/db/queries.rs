use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::models::Spot;
use crate::dedup::UpsertPayload;
use crate::record::{Field, FieldValue, ForecastRecord};

/// Rows per upsert statement. Payloads beyond this are split into
/// consecutive statements.
const UPSERT_CHUNK: usize = 500;

/// All spots, in id order.
pub async fn fetch_spots(pool: &PgPool) -> Result<Vec<Spot>, sqlx::Error> {
    sqlx::query_as::<_, Spot>(
        "SELECT id, name, latitude, longitude, tide_station_id FROM spots ORDER BY id",
    )
    .fetch_all(pool)
    .await
}

/// Forecast rows at or after `since`, ordered for deterministic fill passes.
pub async fn fetch_records_since(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> Result<Vec<ForecastRecord>, sqlx::Error> {
    sqlx::query_as::<_, ForecastRecord>(
        "SELECT spot_id, \"timestamp\",
                primary_swell_height_ft, primary_swell_period_s, primary_swell_direction_deg,
                secondary_swell_height_ft, secondary_swell_period_s, secondary_swell_direction_deg,
                tertiary_swell_height_ft, tertiary_swell_period_s, tertiary_swell_direction_deg,
                surf_height_min_ft, surf_height_max_ft, wave_energy_kj,
                wind_speed_mph, wind_direction_deg, wind_gust_mph,
                temperature_f, pressure_inhg, weather_code,
                water_temp_f, tide_level_ft
         FROM forecast_records
         WHERE \"timestamp\" >= $1
         ORDER BY \"timestamp\", spot_id",
    )
    .bind(since)
    .fetch_all(pool)
    .await
}

/// Upsert partial rows keyed by `(spot_id, timestamp)`.
///
/// Each statement names only the columns present in its payloads, and the
/// conflict action updates exactly those columns — absent columns are left
/// untouched in the store, never nulled. Payloads are grouped by field mask
/// so heterogeneous batches still produce a handful of multi-row statements.
pub async fn upsert_forecast_payloads(
    pool: &PgPool,
    payloads: &[UpsertPayload],
) -> Result<u64, sqlx::Error> {
    let mut total = 0u64;

    for (mask, group) in group_by_field_mask(payloads) {
        for chunk in group.chunks(UPSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO forecast_records (spot_id, \"timestamp\"");
            for field in &mask {
                qb.push(", ");
                qb.push(field.as_str());
            }
            qb.push(") ");

            qb.push_values(chunk, |mut b, payload| {
                b.push_bind(payload.spot_id).push_bind(payload.timestamp);
                for field in &mask {
                    // Guaranteed present: the group is keyed by this mask.
                    let value = payload
                        .fields
                        .iter()
                        .find(|(f, _)| f == field)
                        .map(|(_, v)| *v);
                    match value {
                        Some(FieldValue::Float(v)) => {
                            b.push_bind(v);
                        }
                        Some(FieldValue::Int(v)) => {
                            b.push_bind(v);
                        }
                        None => {
                            b.push_bind(Option::<f64>::None);
                        }
                    }
                }
            });

            qb.push(" ON CONFLICT (spot_id, \"timestamp\") DO UPDATE SET ");
            for (i, field) in mask.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                qb.push(format!("{col} = EXCLUDED.{col}", col = field.as_str()));
            }
            qb.push(", updated_at = NOW()");

            qb.build().execute(pool).await?;
            total += chunk.len() as u64;
        }
    }

    Ok(total)
}

/// Delete forecast rows older than `cutoff` (the retention boundary:
/// today's local midnight). Returns the number of rows removed.
pub async fn delete_records_before(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM forecast_records WHERE \"timestamp\" < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Group payloads by their (sorted) set of present fields, so each group
/// can share one statement with a fixed column list.
fn group_by_field_mask(payloads: &[UpsertPayload]) -> BTreeMap<Vec<Field>, Vec<&UpsertPayload>> {
    let mut groups: BTreeMap<Vec<Field>, Vec<&UpsertPayload>> = BTreeMap::new();
    for payload in payloads {
        let mut mask: Vec<Field> = payload.fields.iter().map(|(f, _)| *f).collect();
        mask.sort();
        mask.dedup();
        groups.entry(mask).or_default().push(payload);
    }
    groups
}
