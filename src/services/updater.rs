//! Background updater loop.
//!
//! Runs a full ingest + fill cycle on a fixed interval:
//!
//! 1. delete rows older than today's local midnight (retention);
//! 2. load the spot registry;
//! 3. run the source stages in merge-policy order, concatenating output;
//! 4. deduplicate (last-writer-wins per field), strip, upsert;
//! 5. read the horizon back, run the batch fill, upsert the changes;
//! 6. run the rowwise fill per field over the residue, upsert again;
//! 7. publish a cycle summary and sleep.
//!
//! A cycle that leaves genuinely unfillable gaps is still a success — the
//! summary carries the counts. State is in-memory (`Arc<RwLock<_>>`); the
//! status endpoint reads it.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::db::queries;
use crate::dedup::{deduplicate, payload_from_changed, prepare_upsert_payloads, StripRules};
use crate::fill::{batch::batch_fill, rowwise::rowwise_fill, ChangedFields, FillConfig, FillStats};
use crate::record::{ForecastRecord, SpotRegistry};

use super::{FetchWindow, SourceStage};

// ---------------------------------------------------------------------------
// Updater state (in-memory, shared via Arc<RwLock<>>)
// ---------------------------------------------------------------------------

/// Records contributed by one source stage during a cycle.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StageCount {
    pub stage: String,
    pub records: usize,
    /// Set when the stage failed; it contributed nothing this cycle.
    pub error: Option<String>,
}

/// Per-field fill counters for the status endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FieldCounter {
    pub field: String,
    pub filled: usize,
    pub unfillable: usize,
}

/// Everything one cycle did, published to the status endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CycleSummary {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub spots: usize,
    pub deleted_rows: u64,
    pub stages: Vec<StageCount>,
    pub merged_records: usize,
    pub upserted_rows: u64,
    pub batch_fill: Vec<FieldCounter>,
    pub rowwise_fill: Vec<FieldCounter>,
    pub records_skipped_unknown_spot: usize,
}

/// Global updater state, exposed via the status endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UpdaterState {
    pub active: bool,
    pub next_wakeup_at: Option<DateTime<Utc>>,
    pub total_cycles: u64,
    pub last_cycle: Option<CycleSummary>,
    /// Set when the most recent cycle aborted (e.g. the database was
    /// unreachable); cleared by the next successful cycle.
    pub last_error: Option<String>,
}

impl UpdaterState {
    pub fn new() -> Self {
        Self {
            active: true,
            next_wakeup_at: None,
            total_cycles: 0,
            last_cycle: None,
            last_error: None,
        }
    }
}

impl Default for UpdaterState {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared updater state handle.
pub type SharedUpdaterState = Arc<RwLock<UpdaterState>>;

// ---------------------------------------------------------------------------
// Main updater loop
// ---------------------------------------------------------------------------

/// Run the updater. Never returns; spawn it with `tokio::spawn`.
pub async fn run_updater(
    pool: PgPool,
    stages: Vec<Box<dyn SourceStage>>,
    state: SharedUpdaterState,
    config: AppConfig,
) {
    tracing::info!(
        "Updater started: {} stages, cadence {:?}, window ±{} buckets",
        stages.len(),
        config.fill_cadence,
        config.fill_window_buckets
    );
    // The merge policy, made auditable: stage order and field ownership.
    for stage in &stages {
        let owned: Vec<&str> = stage.owned_fields().iter().map(|f| f.as_str()).collect();
        tracing::info!("Stage {} owns: {}", stage.name(), owned.join(", "));
    }

    loop {
        match run_cycle(&pool, &stages, &config).await {
            Ok(summary) => {
                tracing::info!(
                    "Cycle complete in {}ms: {} merged records, {} upserted rows, {} filled, {} unfillable",
                    summary.duration_ms,
                    summary.merged_records,
                    summary.upserted_rows,
                    summary.batch_fill.iter().map(|c| c.filled).sum::<usize>()
                        + summary.rowwise_fill.iter().map(|c| c.filled).sum::<usize>(),
                    summary.rowwise_fill.iter().map(|c| c.unfillable).sum::<usize>(),
                );
                let mut s = state.write().await;
                s.total_cycles += 1;
                s.last_cycle = Some(summary);
                s.last_error = None;
                s.next_wakeup_at =
                    Some(Utc::now() + Duration::seconds(config.update_interval_secs as i64));
            }
            Err(e) => {
                tracing::error!("Cycle failed: {}", e);
                let mut s = state.write().await;
                s.last_error = Some(e.to_string());
                s.next_wakeup_at =
                    Some(Utc::now() + Duration::seconds(config.update_interval_secs as i64));
            }
        }

        tokio::time::sleep(std::time::Duration::from_secs(config.update_interval_secs)).await;
    }
}

/// One full ingest + fill cycle.
async fn run_cycle(
    pool: &PgPool,
    stages: &[Box<dyn SourceStage>],
    config: &AppConfig,
) -> Result<CycleSummary, crate::errors::AppError> {
    let started_at = Utc::now();

    // 1. Retention: keep the current horizon, drop everything before
    //    today's local midnight.
    let cutoff = local_midnight(started_at, config.local_offset);
    let deleted_rows = queries::delete_records_before(pool, cutoff).await?;
    if deleted_rows > 0 {
        tracing::info!("Deleted {} forecast rows before {}", deleted_rows, cutoff);
    }

    // 2. Location registry.
    let spots = queries::fetch_spots(pool).await?;
    let mut registry = SpotRegistry::new();
    for spot in &spots {
        registry.insert(spot.id, spot.latitude, spot.longitude);
    }
    if registry.is_empty() {
        return Err(crate::errors::AppError::Internal(
            "no spots with coordinates in the registry".to_string(),
        ));
    }
    tracing::info!("Loaded {} spots with valid coordinates", registry.len());

    let window = FetchWindow {
        start: cutoff,
        end: cutoff + Duration::days(config.forecast_days),
    };

    // 3. Source stages, in merge-policy order.
    let (all_records, stage_counts) = run_stages(stages, &spots, window).await;

    // 4. Merge + upsert. Zero-stripping is on for the source payloads: a
    //    zero from the wave model means "no reading" for swell fields.
    let merged = deduplicate(all_records);
    let rules = StripRules {
        strip_zero: true,
        allow_zero: config.allow_zero_fields.clone(),
    };
    let payloads = prepare_upsert_payloads(&merged, &rules);
    let mut upserted_rows = queries::upsert_forecast_payloads(pool, &payloads).await?;

    // 5. Batch fill over the persisted horizon.
    let fill_config = FillConfig {
        fields: config.fill_fields.clone(),
        cadence: config.fill_cadence,
        window_buckets: config.fill_window_buckets,
        offset: config.local_offset,
    };
    let mut rows = queries::fetch_records_since(pool, cutoff).await?;

    let (batch_stats, batch_changed) = batch_fill(&mut rows, &registry, &fill_config);
    upserted_rows += upsert_changed(pool, &rows, &batch_changed).await?;
    log_fill_pass("batch fill", &batch_stats);

    // 6. Rowwise cleanup over whatever the batch pass left behind.
    let mut rowwise_stats = FillStats::default();
    for &field in &fill_config.fields {
        let (stats, changed) = rowwise_fill(&mut rows, &registry, field, &fill_config);
        upserted_rows += upsert_changed(pool, &rows, &changed).await?;
        rowwise_stats.absorb(stats);
    }
    log_fill_pass("rowwise fill", &rowwise_stats);

    let completed_at = Utc::now();
    Ok(CycleSummary {
        started_at,
        completed_at,
        duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
        spots: spots.len(),
        deleted_rows,
        stages: stage_counts,
        merged_records: merged.len(),
        upserted_rows,
        batch_fill: fill_counters(&batch_stats),
        rowwise_fill: fill_counters(&rowwise_stats),
        records_skipped_unknown_spot: batch_stats.skipped_unknown_spot,
    })
}

/// Run each stage in order, concatenating results. A failed stage is
/// recorded and skipped; earlier stages' values stand.
async fn run_stages(
    stages: &[Box<dyn SourceStage>],
    spots: &[crate::db::models::Spot],
    window: FetchWindow,
) -> (Vec<ForecastRecord>, Vec<StageCount>) {
    let mut all_records = Vec::new();
    let mut counts = Vec::with_capacity(stages.len());

    for stage in stages {
        match stage.fetch(spots, window).await {
            Ok(records) => {
                tracing::info!("Stage {}: {} records", stage.name(), records.len());
                counts.push(StageCount {
                    stage: stage.name().to_string(),
                    records: records.len(),
                    error: None,
                });
                all_records.extend(records);
            }
            Err(e) => {
                tracing::warn!("Stage {} failed, continuing without it: {}", stage.name(), e);
                counts.push(StageCount {
                    stage: stage.name().to_string(),
                    records: 0,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    (all_records, counts)
}

/// Upsert only what a fill pass changed: key fields plus changed columns.
async fn upsert_changed(
    pool: &PgPool,
    rows: &[ForecastRecord],
    changed: &ChangedFields,
) -> Result<u64, sqlx::Error> {
    let payloads: Vec<_> = changed
        .iter()
        .filter_map(|(&idx, fields)| payload_from_changed(&rows[idx], fields))
        .collect();
    queries::upsert_forecast_payloads(pool, &payloads).await
}

/// Today's midnight in the configured civil offset, as a UTC instant.
fn local_midnight(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local = now.with_timezone(&offset);
    local
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| naive.and_local_timezone(offset).single())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

fn fill_counters(stats: &FillStats) -> Vec<FieldCounter> {
    let fields: std::collections::BTreeSet<_> = stats
        .filled
        .keys()
        .chain(stats.unfillable.keys())
        .copied()
        .collect();
    fields
        .into_iter()
        .map(|field| FieldCounter {
            field: field.as_str().to_string(),
            filled: stats.filled.get(&field).copied().unwrap_or(0),
            unfillable: stats.unfillable.get(&field).copied().unwrap_or(0),
        })
        .collect()
}

fn log_fill_pass(pass: &str, stats: &FillStats) {
    if stats.total_filled() == 0 && stats.total_unfillable() == 0 {
        tracing::info!("{}: nothing required filling", pass);
        return;
    }
    for counter in fill_counters(stats) {
        tracing::info!(
            "{}: {} -> {} filled, {} unfillable",
            pass,
            counter.field,
            counter.filled,
            counter.unfillable
        );
    }
    if stats.skipped_unknown_spot > 0 {
        tracing::info!(
            "{}: skipped {} records with unregistered spots",
            pass,
            stats.skipped_unknown_spot
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
