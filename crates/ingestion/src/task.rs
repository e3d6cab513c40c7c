//! The ingest task state machine (§4.9):
//!
//! ```text
//!                 +-> Expired (drop)
//! Queued -> Leased -> Download -> Decode -> Derive -> Write -> Done
//!                \-------> Transient failure -> Reschedule(+4-5m)
//! ```

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use storage::catalog::Catalog;
use storage::{BlobProvider, PutBand};

use crate::decode;
use crate::derive::{wind_from_uv, WindFieldIds};
use crate::error::{IngestionError, Result};
use crate::reducer::{fetch_reduced, FieldSelector};

const EXPIRY_AGE: Duration = Duration::hours(12);
const RESCHEDULE_MIN_SECS: i64 = 240;
const RESCHEDULE_MAX_SECS: i64 = 300;

/// One unit of ingest work, as enqueued by a per-source scheduler (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestTask {
    pub source_id: i64,
    pub run_time: DateTime<Utc>,
    pub valid_time: DateTime<Utc>,
    pub grib_url: String,
    pub idx_url: String,
}

/// The outcome of attempting one task, letting the worker loop decide
/// whether to ack or reschedule.
pub enum TaskOutcome {
    Done,
    Expired,
    Transient { delay: Duration },
}

/// The fields selected for a source, and (for the derived-field hook) the
/// resolved ids of its derived wind metrics, if this source produces them.
///
/// `fetch_selectors` drives the byte-range reduction and includes every
/// field the decoder needs to see, including intermediate inputs (e.g. the
/// U/V wind components) that are never themselves written as output bands.
/// `selectors` is the narrower subset that is actually stored, per §3's
/// "metrics marked intermediate are never ingested directly".
pub struct SourceIngestSpec {
    pub fetch_selectors: Vec<FieldSelector>,
    pub selectors: Vec<(FieldSelector, i64)>,
    pub wind_field_ids: Option<WindFieldIds>,
}

/// Run one ingest task end-to-end: download, decode, derive, write, commit.
/// Never returns `Err` for task-level failures (network, decode, storage) —
/// those are reported as `TaskOutcome::Transient` so the caller can
/// reschedule; only a bug in how the task was constructed propagates as an
/// error.
#[instrument(skip(client, catalog, provider, spec), fields(source_id = task.source_id, valid_time = %task.valid_time))]
pub async fn run_task(
    client: &Client,
    catalog: &Catalog,
    provider: &BlobProvider,
    task: &IngestTask,
    spec: &SourceIngestSpec,
) -> Result<TaskOutcome> {
    if task.valid_time < Utc::now() - EXPIRY_AGE {
        info!("dropping expired task");
        return Ok(TaskOutcome::Expired);
    }

    let buf = match fetch_reduced(client, &task.grib_url, &task.idx_url, &spec.fetch_selectors).await {
        Ok(buf) => buf,
        Err(e) => return Ok(transient_outcome(e)),
    };
    if buf.is_empty() {
        return Ok(transient_outcome(IngestionError::NotYetPublished(task.grib_url.clone())));
    }

    let decoded = match decode::decode_all(catalog, buf).await {
        Ok(d) => d,
        Err(e) => return Ok(transient_outcome(e)),
    };

    // Group decoded messages by (index_short_name, level) -> source_field_id
    // to know which band each message becomes.
    let mut bands_by_projection: std::collections::HashMap<i64, Vec<PutBand>> = std::collections::HashMap::new();
    for decoded_message in &decoded {
        let Some((_, field_id)) = spec.selectors.iter().find(|(selector, _)| {
            selector.short_name == decoded_message.message.parameter()
                && selector.level == decoded_message.message.level()
        }) else {
            continue;
        };
        bands_by_projection
            .entry(decoded_message.projection_id)
            .or_default()
            .push(PutBand {
                source_field_id: *field_id,
                valid_time: decoded_message.message.valid_time(),
                run_time: decoded_message.message.identification.reference_time,
                vals_per_loc: 1,
                values: decoded_message.values.clone(),
            });
    }

    if let Some(wind_field_ids) = spec.wind_field_ids {
        for messages in group_by_projection(&decoded).values() {
            let projection_id = messages[0].projection_id;
            let wind_bands = wind_from_uv(messages, wind_field_ids);
            bands_by_projection.entry(projection_id).or_default().extend(wind_bands);
        }
    }

    for (projection_id, bands) in bands_by_projection {
        let projection = match catalog.get_projection(projection_id).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                warn!(projection_id, "projection vanished between decode and write");
                continue;
            }
            Err(e) => return Ok(transient_outcome(e)),
        };
        if let Err(e) = provider
            .put_fields(catalog, projection_id, projection.n_x as u32, projection.n_y as u32, bands)
            .await
        {
            return Ok(transient_outcome(e));
        }
    }

    catalog.touch_source(task.source_id).await?;
    info!("ingest task committed");
    Ok(TaskOutcome::Done)
}

fn group_by_projection(decoded: &[decode::DecodedMessage]) -> std::collections::HashMap<i64, Vec<&decode::DecodedMessage>> {
    let mut by_projection: std::collections::HashMap<i64, Vec<&decode::DecodedMessage>> = std::collections::HashMap::new();
    for message in decoded {
        by_projection.entry(message.projection_id).or_default().push(message);
    }
    by_projection
}

fn transient_outcome(err: impl Into<IngestionError>) -> TaskOutcome {
    let err = err.into();
    warn!(error = %err, "task failed, will reschedule");
    let delay_secs = rand::thread_rng().gen_range(RESCHEDULE_MIN_SECS..=RESCHEDULE_MAX_SECS);
    TaskOutcome::Transient { delay: Duration::seconds(delay_secs) }
}
