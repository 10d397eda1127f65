//! Row-by-row guaranteed fill pass.
//!
//! Final cleanup after [`super::batch::batch_fill`]. Instead of list order,
//! each iteration fills the single missing record whose distance to its
//! nearest current donor is globally smallest, then promotes it. The donor
//! frontier grows outward from the data, so any record transitively
//! reachable from a donor eventually fills. Quadratic in the number of
//! missing records per bucket; intended for the residual nulls the batch
//! pass left behind, not the full dataset.

use crate::record::{Field, ForecastRecord, SpotRegistry};

use super::{
    group_by_bucket, nearest_donor, partition_bucket, window_donors, ChangedFields, Donor,
    FillConfig, FillStats,
};

/// Fill one field across all buckets, nearest-frontier first.
///
/// Mutates `records` in place. Terminates per bucket when no missing record
/// remains or an iteration makes no progress (no reachable donor); the
/// leftovers are reported unfillable.
pub fn rowwise_fill(
    records: &mut [ForecastRecord],
    registry: &SpotRegistry,
    field: Field,
    config: &FillConfig,
) -> (FillStats, ChangedFields) {
    let mut stats = FillStats::default();
    let mut changed = ChangedFields::new();

    let (groups, skipped) = group_by_bucket(records, registry, config.cadence, config.offset);
    stats.skipped_unknown_spot = skipped;

    let buckets: Vec<_> = groups.keys().copied().collect();

    for bucket in buckets {
        let indices = groups[&bucket].clone();
        let (mut donors, mut missing) = partition_bucket(&indices, records, registry, field);

        if missing.is_empty() {
            continue;
        }

        if donors.is_empty() {
            donors = window_donors(&groups, records, registry, field, bucket, config);
        }
        if donors.is_empty() {
            stats.record_unfillable(field, missing.len());
            continue;
        }

        // Bounded by the missing count: every iteration either fills one
        // record (and the donor pool strictly grows) or stops.
        while !missing.is_empty() {
            let mut best: Option<(usize, f64)> = None;

            for (pos, &(_, lat, lon)) in missing.iter().enumerate() {
                let mut min_distance = f64::INFINITY;
                for donor in &donors {
                    let d = crate::geo::haversine_km(lat, lon, donor.lat, donor.lon);
                    if d < min_distance {
                        min_distance = d;
                    }
                }
                if min_distance.is_finite()
                    && best.map_or(true, |(_, best_d)| min_distance < best_d)
                {
                    best = Some((pos, min_distance));
                }
            }

            let Some((pos, _)) = best else {
                // No finite path to any donor; stop rather than spin.
                stats.record_unfillable(field, missing.len());
                break;
            };

            let (idx, lat, lon) = missing.remove(pos);
            match nearest_donor(lat, lon, &donors) {
                Some(value) => {
                    records[idx].set(field, value);
                    changed.entry(idx).or_default().push(field);
                    stats.record_filled(field);
                    donors.push(Donor { lat, lon, value });
                }
                None => stats.record_unfillable(field, 1),
            }
        }
    }

    (stats, changed)
}
