//! Deduplication and upsert payload preparation.
//!
//! Source stages each emit their own record for a `(spot_id, timestamp)`
//! key; before anything is written, the duplicates are merged field-by-field
//! with later-in-input-order wins — which, with stages run in policy order,
//! is exactly the source merge policy. A later record's null never erases an
//! earlier record's value.
//!
//! The second half prepares the actual upsert payloads: null fields are
//! stripped so a partial write can never clobber a previously persisted
//! value, and zero values are optionally stripped for fields where zero is a
//! "no data" sentinel rather than a reading (swell heights from the wave
//! model, mainly). Fields where zero is honest data — calm wind, a zero
//! gust, north wind direction, a 0.0 ft tide — are protected by the
//! allow-zero list.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::record::{Field, FieldValue, ForecastRecord};

/// Zero-stripping rules for upsert payload preparation.
#[derive(Debug, Clone)]
pub struct StripRules {
    /// When true, exact-zero values are dropped unless allow-listed.
    pub strip_zero: bool,
    /// Fields where zero is a valid reading and must be preserved.
    pub allow_zero: HashSet<Field>,
}

impl StripRules {
    fn keeps(&self, field: Field, value: FieldValue) -> bool {
        !self.strip_zero || !value.is_zero() || self.allow_zero.contains(&field)
    }
}

/// A minimal upsert row: the natural key plus only the fields to write.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertPayload {
    pub spot_id: i64,
    pub timestamp: DateTime<Utc>,
    pub fields: Vec<(Field, FieldValue)>,
}

/// Merge records sharing a natural key, later-non-null wins per field.
///
/// Output order is first-seen key order, so repeated runs over the same
/// input produce identical output; applying this to its own output is a
/// no-op.
pub fn deduplicate(records: Vec<ForecastRecord>) -> Vec<ForecastRecord> {
    let mut merged: Vec<ForecastRecord> = Vec::with_capacity(records.len());
    let mut by_key: HashMap<(i64, DateTime<Utc>), usize> = HashMap::new();

    for record in records {
        match by_key.get(&record.key()) {
            Some(&idx) => {
                let target = &mut merged[idx];
                for field in Field::ALL {
                    if let Some(value) = record.get(field) {
                        target.set(field, value);
                    }
                }
            }
            None => {
                by_key.insert(record.key(), merged.len());
                merged.push(record);
            }
        }
    }

    merged
}

/// Build upsert payloads from full records, stripping nulls (always) and
/// zeros (per `rules`). Records left with no value fields are dropped —
/// there is nothing to write for them.
pub fn prepare_upsert_payloads(
    records: &[ForecastRecord],
    rules: &StripRules,
) -> Vec<UpsertPayload> {
    records
        .iter()
        .filter_map(|record| {
            let fields: Vec<(Field, FieldValue)> = Field::ALL
                .into_iter()
                .filter_map(|field| record.get(field).map(|value| (field, value)))
                .filter(|&(field, value)| rules.keeps(field, value))
                .collect();

            if fields.is_empty() {
                None
            } else {
                Some(UpsertPayload {
                    spot_id: record.spot_id,
                    timestamp: record.timestamp,
                    fields,
                })
            }
        })
        .collect()
}

/// Build the payload for a fill-pass result: the key plus exactly the
/// changed fields. Fill values come from donors, so they are non-null by
/// construction and no stripping applies.
pub fn payload_from_changed(record: &ForecastRecord, changed: &[Field]) -> Option<UpsertPayload> {
    let fields: Vec<(Field, FieldValue)> = changed
        .iter()
        .filter_map(|&field| record.get(field).map(|value| (field, value)))
        .collect();

    if fields.is_empty() {
        None
    } else {
        Some(UpsertPayload {
            spot_id: record.spot_id,
            timestamp: record.timestamp,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn record(spot_id: i64, stamp: &str) -> ForecastRecord {
        ForecastRecord::new(spot_id, ts(stamp))
    }

    /// Null-stripping only; every zero survives.
    fn no_zero_strip() -> StripRules {
        StripRules {
            strip_zero: false,
            allow_zero: HashSet::new(),
        }
    }

    #[test]
    fn test_merge_last_write_wins_null_never_erases() {
        // Three writers for the same key: the later non-null temperature
        // wins, the trailing null temperature does not erase it.
        let mut r1 = record(7, "2025-01-01T00:00:00Z");
        r1.set(Field::TemperatureF, FieldValue::Float(65.0));

        let mut r2 = record(7, "2025-01-01T00:00:00Z");
        r2.set(Field::TemperatureF, FieldValue::Float(70.0));
        r2.set(Field::PressureInhg, FieldValue::Float(29.9));

        let mut r3 = record(7, "2025-01-01T00:00:00Z");
        r3.set(Field::WindSpeedMph, FieldValue::Float(10.0));

        let merged = deduplicate(vec![r1, r2, r3]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].temperature_f, Some(70.0));
        assert_eq!(merged[0].pressure_inhg, Some(29.9));
        assert_eq!(merged[0].wind_speed_mph, Some(10.0));
    }

    #[test]
    fn test_distinct_keys_stay_distinct() {
        let a = record(1, "2025-01-01T00:00:00Z");
        let b = record(1, "2025-01-01T01:00:00Z");
        let c = record(2, "2025-01-01T00:00:00Z");
        assert_eq!(deduplicate(vec![a, b, c]).len(), 3);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let mut r1 = record(3, "2025-01-01T00:00:00Z");
        r1.set(Field::WindSpeedMph, FieldValue::Float(8.0));
        let mut r2 = record(3, "2025-01-01T00:00:00Z");
        r2.set(Field::WindGustMph, FieldValue::Float(14.0));
        let mut r3 = record(4, "2025-01-01T00:00:00Z");
        r3.set(Field::WeatherCode, FieldValue::Int(3));

        let once = deduplicate(vec![r1, r2, r3]);
        let twice = deduplicate(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_payload_never_contains_null_fields() {
        let mut r = record(5, "2025-01-01T00:00:00Z");
        r.set(Field::TemperatureF, FieldValue::Float(61.0));

        let payloads = prepare_upsert_payloads(&[r], &no_zero_strip());
        assert_eq!(payloads.len(), 1);
        assert_eq!(
            payloads[0].fields,
            vec![(Field::TemperatureF, FieldValue::Float(61.0))]
        );
        // No null field key appears in any form
        assert!(payloads[0]
            .fields
            .iter()
            .all(|(f, _)| *f == Field::TemperatureF));
    }

    #[test]
    fn test_empty_record_produces_no_payload() {
        let r = record(5, "2025-01-01T00:00:00Z");
        assert!(prepare_upsert_payloads(&[r], &no_zero_strip()).is_empty());
    }

    #[test]
    fn test_zero_allow_list() {
        let mut r = record(9, "2025-01-01T00:00:00Z");
        r.set(Field::WindSpeedMph, FieldValue::Float(0.0));
        r.set(Field::WaveEnergyKj, FieldValue::Int(0));

        let rules = StripRules {
            strip_zero: true,
            allow_zero: [Field::WindSpeedMph].into_iter().collect(),
        };
        let payloads = prepare_upsert_payloads(&[r], &rules);
        assert_eq!(payloads.len(), 1);
        // Calm wind survives; the zero energy sentinel is stripped.
        assert_eq!(
            payloads[0].fields,
            vec![(Field::WindSpeedMph, FieldValue::Float(0.0))]
        );
    }

    #[test]
    fn test_zero_gust_is_preserved_when_allowed() {
        let mut r = record(9, "2025-01-01T00:00:00Z");
        r.set(Field::WindGustMph, FieldValue::Float(0.0));

        let rules = StripRules {
            strip_zero: true,
            allow_zero: [Field::WindGustMph].into_iter().collect(),
        };
        let payloads = prepare_upsert_payloads(&[r], &rules);
        assert_eq!(
            payloads[0].fields,
            vec![(Field::WindGustMph, FieldValue::Float(0.0))]
        );
    }

    #[test]
    fn test_payload_from_changed_only_carries_changed_fields() {
        let mut r = record(2, "2025-01-01T03:00:00Z");
        r.set(Field::WeatherCode, FieldValue::Int(2));
        r.set(Field::TemperatureF, FieldValue::Float(59.0));

        let payload = payload_from_changed(&r, &[Field::WeatherCode]).unwrap();
        assert_eq!(payload.fields, vec![(Field::WeatherCode, FieldValue::Int(2))]);
    }

    #[test]
    fn test_payload_from_changed_empty() {
        let r = record(2, "2025-01-01T03:00:00Z");
        assert!(payload_from_changed(&r, &[]).is_none());
        // A "changed" field that is somehow null contributes nothing.
        assert!(payload_from_changed(&r, &[Field::WeatherCode]).is_none());
    }
}
