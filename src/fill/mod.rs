//! Neighbor gap-fill engine.
//!
//! After the source stages have written what they know, some (spot,
//! timestamp, field) triples are still null — a station outage, a grid cell
//! the wave model skips, a tide gauge with no water-temperature sensor. The
//! fill passes borrow those values from the spatially nearest record that
//! has one, widening the search to adjacent time buckets when a whole
//! bucket is dry.
//!
//! Two passes share this module's plumbing:
//! - [`batch::batch_fill`] — the fast pass, processing missing records in
//!   list order and promoting each fill into the donor pool.
//! - [`rowwise::rowwise_fill`] — the slow cleanup pass, always filling the
//!   missing record closest to the current donor frontier first, which
//!   guarantees full coverage whenever any donor is transitively reachable.
//!
//! A gap with no donor anywhere in the window is a normal terminal state,
//! reported in [`FillStats`] as unfillable — never an error, and never
//! silently conflated with "nothing needed filling".

pub mod batch;
pub mod rowwise;

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Utc};

use crate::bucket::{bucket_timestamp, fallback_window, Cadence};
use crate::geo::haversine_km;
use crate::record::{Field, FieldValue, ForecastRecord, SpotRegistry};

/// Tuning for a fill run.
#[derive(Debug, Clone)]
pub struct FillConfig {
    /// Fields to attempt to fill, processed independently and in order.
    pub fields: Vec<Field>,
    /// Bucket width for "same time" grouping.
    pub cadence: Cadence,
    /// Temporal fallback radius, in buckets, when a bucket has no donors.
    pub window_buckets: u32,
    /// Civil-time origin for bucket alignment.
    pub offset: FixedOffset,
}

/// Counters reported by a fill pass. Partial coverage is the expected
/// steady state, so problems surface here rather than as errors.
#[derive(Debug, Clone, Default)]
pub struct FillStats {
    /// Values written, per field.
    pub filled: BTreeMap<Field, usize>,
    /// Gaps with no donor even after temporal fallback, per field.
    pub unfillable: BTreeMap<Field, usize>,
    /// Records skipped because their spot is not in the registry.
    pub skipped_unknown_spot: usize,
}

impl FillStats {
    pub fn record_filled(&mut self, field: Field) {
        *self.filled.entry(field).or_insert(0) += 1;
    }

    pub fn record_unfillable(&mut self, field: Field, count: usize) {
        if count > 0 {
            *self.unfillable.entry(field).or_insert(0) += count;
        }
    }

    pub fn total_filled(&self) -> usize {
        self.filled.values().sum()
    }

    pub fn total_unfillable(&self) -> usize {
        self.unfillable.values().sum()
    }

    /// Fold another pass's counters into this one.
    pub fn absorb(&mut self, other: FillStats) {
        for (field, n) in other.filled {
            *self.filled.entry(field).or_insert(0) += n;
        }
        for (field, n) in other.unfillable {
            *self.unfillable.entry(field).or_insert(0) += n;
        }
        self.skipped_unknown_spot += other.skipped_unknown_spot;
    }
}

/// Record indices that were modified, with the fields that changed.
/// Drives the minimal upsert payloads after a pass.
pub type ChangedFields = BTreeMap<usize, Vec<Field>>;

/// A located value eligible to be copied to a nearby record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Donor {
    pub lat: f64,
    pub lon: f64,
    pub value: FieldValue,
}

/// The value of the geometrically nearest donor, linear scan.
///
/// Strict `<` means the first-seen donor wins exact ties — deterministic,
/// and with the window ordered nearest-bucket-first, biased toward donors
/// closer in time. Returns `None` for an empty pool, or when every donor is
/// at infinite distance (non-finite coordinates).
pub(crate) fn nearest_donor(lat: f64, lon: f64, donors: &[Donor]) -> Option<FieldValue> {
    let mut best: Option<FieldValue> = None;
    let mut best_distance = f64::INFINITY;

    for donor in donors {
        let distance = haversine_km(lat, lon, donor.lat, donor.lon);
        if distance < best_distance {
            best_distance = distance;
            best = Some(donor.value);
        }
    }

    best
}

/// Group record indices by normalised bucket, skipping records whose spot
/// has no registered coordinates. Returns the groups (sorted by bucket, so
/// iteration order is deterministic) and the skip count.
pub(crate) fn group_by_bucket(
    records: &[ForecastRecord],
    registry: &SpotRegistry,
    cadence: Cadence,
    offset: FixedOffset,
) -> (BTreeMap<DateTime<Utc>, Vec<usize>>, usize) {
    let mut groups: BTreeMap<DateTime<Utc>, Vec<usize>> = BTreeMap::new();
    let mut skipped = 0;

    for (idx, record) in records.iter().enumerate() {
        if registry.get(record.spot_id).is_none() {
            tracing::debug!(
                "skipping record (spot {}, {}): no coordinates in registry",
                record.spot_id,
                record.timestamp
            );
            skipped += 1;
            continue;
        }
        let bucket = bucket_timestamp(record.timestamp, cadence, offset);
        groups.entry(bucket).or_default().push(idx);
    }

    (groups, skipped)
}

/// Flat-day veto: the surf minimum stays null when the maximum says "no
/// surf" (a 1 ft ceiling). Requires `surf_height_max_ft` to be processed
/// before `surf_height_min_ft`, which [`Field::ALL`] guarantees.
pub(crate) fn skip_fill(record: &ForecastRecord, field: Field) -> bool {
    field == Field::SurfHeightMinFt && record.surf_height_max_ft == Some(1.0)
}

/// Donors and missing recipients for one field within one bucket. Records
/// vetoed by [`skip_fill`] are neither: they stay null and are not counted
/// as unfillable.
pub(crate) fn partition_bucket(
    indices: &[usize],
    records: &[ForecastRecord],
    registry: &SpotRegistry,
    field: Field,
) -> (Vec<Donor>, Vec<(usize, f64, f64)>) {
    let mut donors = Vec::new();
    let mut missing = Vec::new();

    for &idx in indices {
        let record = &records[idx];
        let Some((lat, lon)) = registry.get(record.spot_id) else {
            continue;
        };
        match record.get(field) {
            Some(value) => donors.push(Donor { lat, lon, value }),
            None if skip_fill(record, field) => {}
            None => missing.push((idx, lat, lon)),
        }
    }

    (donors, missing)
}

/// Seed a donor pool from the temporal fallback window around `center`.
///
/// Walks the `2·window + 1` buckets nearest-first and collects every record
/// with a value for `field`, carrying each donor's own location regardless
/// of which bucket it came from. Does not change any record's bucket
/// membership — it only widens the candidate pool for this one fill.
pub(crate) fn window_donors(
    groups: &BTreeMap<DateTime<Utc>, Vec<usize>>,
    records: &[ForecastRecord],
    registry: &SpotRegistry,
    field: Field,
    center: DateTime<Utc>,
    config: &FillConfig,
) -> Vec<Donor> {
    let mut donors = Vec::new();

    for bucket in fallback_window(center, config.cadence, config.window_buckets) {
        let Some(indices) = groups.get(&bucket) else {
            continue;
        };
        for &idx in indices {
            let record = &records[idx];
            let (Some((lat, lon)), Some(value)) =
                (registry.get(record.spot_id), record.get(field))
            else {
                continue;
            };
            donors.push(Donor { lat, lon, value });
        }
    }

    donors
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use chrono::FixedOffset;

    pub fn config(fields: Vec<Field>, window_buckets: u32) -> FillConfig {
        FillConfig {
            fields,
            cadence: Cadence::Hourly,
            window_buckets,
            offset: FixedOffset::west_opt(8 * 3600).unwrap(),
        }
    }

    pub fn registry(spots: &[(i64, f64, f64)]) -> SpotRegistry {
        let mut reg = SpotRegistry::new();
        for &(id, lat, lon) in spots {
            reg.insert(id, lat, lon);
        }
        reg
    }

    pub fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }
}
