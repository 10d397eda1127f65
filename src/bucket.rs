//! Timestamp bucketing.
//!
//! Records from different source adapters arrive with slightly different raw
//! timestamps; two records are "at the same time" when they normalise to the
//! same bucket. Buckets are aligned to a civil-time origin (a fixed UTC
//! offset) so 3-hourly marks land on 00:00, 03:00, … local time, matching
//! the cadence the product displays.

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Timelike, Utc};

/// Bucket width for grouping records in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Hourly,
    ThreeHourly,
}

impl Cadence {
    /// Parse the config spelling ("H" or "3H", case-insensitive).
    pub fn parse(s: &str) -> Option<Cadence> {
        match s.trim().to_ascii_uppercase().as_str() {
            "H" | "1H" => Some(Cadence::Hourly),
            "3H" => Some(Cadence::ThreeHourly),
            _ => None,
        }
    }

    pub fn hours(self) -> u32 {
        match self {
            Cadence::Hourly => 1,
            Cadence::ThreeHourly => 3,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::hours(self.hours() as i64)
    }
}

/// Normalise a timestamp to its bucket: convert to the civil offset,
/// truncate the hour down to a cadence multiple, zero the sub-hour part,
/// and convert back to UTC. Idempotent by construction.
pub fn bucket_timestamp(ts: DateTime<Utc>, cadence: Cadence, offset: FixedOffset) -> DateTime<Utc> {
    let local = ts.with_timezone(&offset);
    let hour = local.hour() - local.hour() % cadence.hours();

    local
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(ts)
}

/// The buckets searched by the temporal fallback: the centre bucket first,
/// then outward in increasing time distance (−1, +1, −2, +2, …). Returning
/// the nearest buckets first means that when two donors are equidistant in
/// space, the one closer in time wins the first-seen tie-break.
pub fn fallback_window(
    center: DateTime<Utc>,
    cadence: Cadence,
    radius: u32,
) -> Vec<DateTime<Utc>> {
    let step = cadence.duration();
    let mut buckets = Vec::with_capacity(2 * radius as usize + 1);
    buckets.push(center);
    for i in 1..=radius as i64 {
        buckets.push(center - step * i as i32);
        buckets.push(center + step * i as i32);
    }
    buckets
}
