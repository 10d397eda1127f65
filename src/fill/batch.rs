//! Batch fill pass.
//!
//! For every (bucket, field) pair, partitions the bucket's records into
//! donors and missing, then assigns each missing record the value of its
//! nearest donor, in list order, promoting every fresh fill into the donor
//! pool before the next record is processed. Fill quality can therefore
//! depend on processing order within a bucket — an accepted approximation;
//! the rowwise pass exists to mop up after it.

use crate::record::{ForecastRecord, SpotRegistry};

use super::{
    group_by_bucket, nearest_donor, partition_bucket, window_donors, ChangedFields, Donor,
    FillConfig, FillStats,
};

/// Run the batch fill over `records`, mutating them in place.
///
/// Fields are processed independently: a record missing field A but holding
/// field B is a donor for B and a recipient for A within the same pass.
/// Returns the per-field statistics and the changed (record, fields) set
/// for building minimal upsert payloads.
pub fn batch_fill(
    records: &mut [ForecastRecord],
    registry: &SpotRegistry,
    config: &FillConfig,
) -> (FillStats, ChangedFields) {
    let mut stats = FillStats::default();
    let mut changed = ChangedFields::new();

    let (groups, skipped) = group_by_bucket(records, registry, config.cadence, config.offset);
    stats.skipped_unknown_spot = skipped;

    let buckets: Vec<_> = groups.keys().copied().collect();

    for bucket in buckets {
        let indices = groups[&bucket].clone();

        for &field in &config.fields {
            let (mut donors, missing) = partition_bucket(&indices, records, registry, field);

            if missing.is_empty() {
                continue;
            }

            if donors.is_empty() {
                donors = window_donors(&groups, records, registry, field, bucket, config);
                if donors.is_empty() {
                    tracing::debug!(
                        "bucket {} field {}: {} targets but no donors in window",
                        bucket,
                        field.as_str(),
                        missing.len()
                    );
                    stats.record_unfillable(field, missing.len());
                    continue;
                }
            }

            for (idx, lat, lon) in missing {
                match nearest_donor(lat, lon, &donors) {
                    Some(value) => {
                        records[idx].set(field, value);
                        changed.entry(idx).or_default().push(field);
                        stats.record_filled(field);
                        // Promote the fresh fill so later records in this
                        // bucket can borrow from it.
                        donors.push(Donor { lat, lon, value });
                    }
                    None => stats.record_unfillable(field, 1),
                }
            }
        }
    }

    (stats, changed)
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::record::{Field, FieldValue};

    /// Scenario A from the product checks: X has weather, Y and Z are null.
    /// Y is ~5 km from X; Z is ~50 km from X and ~40 km from Y.
    fn scenario_a() -> (SpotRegistry, Vec<ForecastRecord>) {
        let reg = registry(&[
            (1, 33.60, -117.90), // X
            (2, 33.645, -117.90), // Y, ~5 km north of X
            (3, 33.60, -117.36), // Z, ~50 km east of X
        ]);
        let stamp = "2026-02-01T17:00:00Z";
        let mut x = ForecastRecord::new(1, ts(stamp));
        x.set(Field::WeatherCode, FieldValue::Int(2));
        let y = ForecastRecord::new(2, ts(stamp));
        let z = ForecastRecord::new(3, ts(stamp));
        (reg, vec![x, y, z])
    }

    #[test]
    fn test_simple_neighbor_fill() {
        let (reg, mut records) = scenario_a();
        let cfg = config(vec![Field::WeatherCode], 0);

        let (stats, changed) = batch_fill(&mut records, &reg, &cfg);

        assert_eq!(stats.filled.get(&Field::WeatherCode), Some(&2));
        assert!(stats.unfillable.is_empty());
        assert_eq!(records[1].weather_code, Some(2));
        assert_eq!(records[2].weather_code, Some(2));
        assert_eq!(changed.get(&1), Some(&vec![Field::WeatherCode]));
        assert_eq!(changed.get(&2), Some(&vec![Field::WeatherCode]));
        // The donor itself is untouched.
        assert!(!changed.contains_key(&0));
    }

    #[test]
    fn test_deterministic_across_runs() {
        let cfg = config(vec![Field::WeatherCode], 0);
        let (reg, mut first) = scenario_a();
        let (_, mut second) = scenario_a();

        let (stats1, changed1) = batch_fill(&mut first, &reg, &cfg);
        let (stats2, changed2) = batch_fill(&mut second, &reg, &cfg);

        assert_eq!(first, second);
        assert_eq!(stats1.filled, stats2.filled);
        assert_eq!(changed1, changed2);
    }

    /// Scenario B: every record at bucket T is null for tide level; the
    /// only donor sits three hourly buckets earlier.
    fn scenario_b() -> (SpotRegistry, Vec<ForecastRecord>) {
        let reg = registry(&[(1, 33.60, -117.90), (2, 33.645, -117.90)]);
        let mut donor = ForecastRecord::new(1, ts("2026-02-01T14:00:00Z"));
        donor.set(Field::TideLevelFt, FieldValue::Float(3.5));
        let a = ForecastRecord::new(1, ts("2026-02-01T17:00:00Z"));
        let b = ForecastRecord::new(2, ts("2026-02-01T17:00:00Z"));
        (reg, vec![donor, a, b])
    }

    #[test]
    fn test_temporal_fallback_fills_from_adjacent_bucket() {
        let (reg, mut records) = scenario_b();
        let cfg = config(vec![Field::TideLevelFt], 6);

        let (stats, _) = batch_fill(&mut records, &reg, &cfg);

        assert_eq!(records[1].tide_level_ft, Some(3.5));
        assert_eq!(records[2].tide_level_ft, Some(3.5));
        assert_eq!(stats.filled.get(&Field::TideLevelFt), Some(&2));
        assert!(stats.unfillable.is_empty());
    }

    #[test]
    fn test_zero_window_leaves_gaps_unfillable() {
        let (reg, mut records) = scenario_b();
        let cfg = config(vec![Field::TideLevelFt], 0);

        let (stats, changed) = batch_fill(&mut records, &reg, &cfg);

        assert_eq!(records[1].tide_level_ft, None);
        assert_eq!(records[2].tide_level_ft, None);
        assert_eq!(stats.unfillable.get(&Field::TideLevelFt), Some(&2));
        assert!(stats.filled.is_empty());
        assert!(changed.is_empty());
    }

    #[test]
    fn test_all_null_bucket_reports_unfillable_not_filled() {
        let reg = registry(&[(1, 33.0, -117.0), (2, 34.0, -118.0)]);
        let mut records = vec![
            ForecastRecord::new(1, ts("2026-02-01T17:00:00Z")),
            ForecastRecord::new(2, ts("2026-02-01T17:00:00Z")),
        ];
        let cfg = config(vec![Field::WaterTempF], 6);

        let (stats, changed) = batch_fill(&mut records, &reg, &cfg);

        assert_eq!(stats.unfillable.get(&Field::WaterTempF), Some(&2));
        assert_eq!(stats.total_filled(), 0);
        assert!(changed.is_empty());
        assert_eq!(records[0].water_temp_f, None);
    }

    #[test]
    fn test_record_is_donor_for_one_field_recipient_for_another() {
        let reg = registry(&[(1, 33.60, -117.90), (2, 33.645, -117.90)]);
        let stamp = "2026-02-01T17:00:00Z";
        let mut a = ForecastRecord::new(1, ts(stamp));
        a.set(Field::WeatherCode, FieldValue::Int(3));
        let mut b = ForecastRecord::new(2, ts(stamp));
        b.set(Field::WindDirectionDeg, FieldValue::Float(270.0));
        let mut records = vec![a, b];

        let cfg = config(vec![Field::WeatherCode, Field::WindDirectionDeg], 0);
        let (stats, _) = batch_fill(&mut records, &reg, &cfg);

        assert_eq!(records[0].wind_direction_deg, Some(270.0));
        assert_eq!(records[1].weather_code, Some(3));
        assert_eq!(stats.total_filled(), 2);
    }

    #[test]
    fn test_filled_record_promoted_into_donor_pool() {
        // A straight line of spots: only the first has a value. List-order
        // processing with promotion walks the value down the line.
        let reg = registry(&[
            (1, 33.00, -117.90),
            (2, 33.10, -117.90),
            (3, 33.20, -117.90),
            (4, 33.30, -117.90),
        ]);
        let stamp = "2026-02-01T17:00:00Z";
        let mut donor = ForecastRecord::new(1, ts(stamp));
        donor.set(Field::SecondarySwellHeightFt, FieldValue::Float(2.0));
        let mut records = vec![
            donor,
            ForecastRecord::new(2, ts(stamp)),
            ForecastRecord::new(3, ts(stamp)),
            ForecastRecord::new(4, ts(stamp)),
        ];

        let cfg = config(vec![Field::SecondarySwellHeightFt], 0);
        let (stats, _) = batch_fill(&mut records, &reg, &cfg);

        assert_eq!(stats.filled.get(&Field::SecondarySwellHeightFt), Some(&3));
        for rec in &records {
            assert_eq!(rec.secondary_swell_height_ft, Some(2.0));
        }
    }

    #[test]
    fn test_unknown_spot_is_skipped_and_counted() {
        let reg = registry(&[(1, 33.60, -117.90), (2, 33.645, -117.90)]);
        let stamp = "2026-02-01T17:00:00Z";
        let mut donor = ForecastRecord::new(1, ts(stamp));
        donor.set(Field::WeatherCode, FieldValue::Int(1));
        let orphan = ForecastRecord::new(42, ts(stamp));
        let target = ForecastRecord::new(2, ts(stamp));
        let mut records = vec![donor, orphan, target];

        let cfg = config(vec![Field::WeatherCode], 0);
        let (stats, _) = batch_fill(&mut records, &reg, &cfg);

        assert_eq!(stats.skipped_unknown_spot, 1);
        assert_eq!(records[1].weather_code, None, "orphan must not be filled");
        assert_eq!(records[2].weather_code, Some(1));
    }

    #[test]
    fn test_flat_day_surf_min_is_not_filled() {
        let reg = registry(&[(1, 33.60, -117.90), (2, 33.645, -117.90), (3, 33.70, -117.90)]);
        let stamp = "2026-02-01T17:00:00Z";
        // Donor with a real surf minimum
        let mut donor = ForecastRecord::new(1, ts(stamp));
        donor.set(Field::SurfHeightMinFt, FieldValue::Float(2.0));
        donor.set(Field::SurfHeightMaxFt, FieldValue::Float(4.0));
        // Flat day: max pinned at 1 ft, min deliberately null
        let mut flat = ForecastRecord::new(2, ts(stamp));
        flat.set(Field::SurfHeightMaxFt, FieldValue::Float(1.0));
        // Normal gap: should fill
        let mut gap = ForecastRecord::new(3, ts(stamp));
        gap.set(Field::SurfHeightMaxFt, FieldValue::Float(3.0));
        let mut records = vec![donor, flat, gap];

        let cfg = config(vec![Field::SurfHeightMaxFt, Field::SurfHeightMinFt], 0);
        let (stats, _) = batch_fill(&mut records, &reg, &cfg);

        assert_eq!(records[1].surf_height_min_ft, None, "flat day stays null");
        assert_eq!(records[2].surf_height_min_ft, Some(2.0));
        // The veto is not an unfillable gap
        assert!(stats.unfillable.is_empty());
    }

    #[test]
    fn test_empty_input() {
        let reg = registry(&[]);
        let cfg = config(vec![Field::WeatherCode], 6);
        let mut records: Vec<ForecastRecord> = Vec::new();
        let (stats, changed) = batch_fill(&mut records, &reg, &cfg);
        assert_eq!(stats.total_filled(), 0);
        assert_eq!(stats.total_unfillable(), 0);
        assert!(changed.is_empty());
    }
}
