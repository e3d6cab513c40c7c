//! Artifact compaction for the object-store backend (§4.6).
//!
//! Merges small artifacts into larger ones so the query service reads fewer
//! objects per request. The wide-column backend needs none of this: its
//! rows are already merged by construction, which is why `merge()` only
//! dispatches here for `BlobProvider::S3`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::catalog::{BandRow, Catalog, FileMetaRow};
use crate::object_store::StoragePath;
use crate::provider::ProviderResult;
use crate::s3_backend::S3Backend;
use weather_common::WeatherError;

const MIN_ARTIFACTS_TO_MERGE: usize = 8;
const MAX_BATCH_SIZE: usize = 50;
const STRIPE_CONCURRENCY: usize = 10;

#[instrument(skip(backend, catalog))]
pub async fn run(backend: &S3Backend, catalog: &Catalog) -> ProviderResult<()> {
    for projection_id in catalog.all_projection_ids().await? {
        let artifacts = catalog.artifacts_for_projection(projection_id).await?;
        if artifacts.len() < MIN_ARTIFACTS_TO_MERGE {
            continue;
        }
        // As many artifacts as fit in one batch, capped at MAX_BATCH_SIZE —
        // the goal is fewer, larger artifacts, so a projection with fewer
        // than MAX_BATCH_SIZE eligible artifacts merges into exactly one.
        let batch_size = artifacts.len().min(MAX_BATCH_SIZE);
        for batch in artifacts.chunks(batch_size) {
            if let Err(e) = merge_batch(backend, catalog, projection_id, batch).await {
                warn!(projection_id, error = %e, "merge batch failed, leaving sources intact");
            }
        }
    }
    Ok(())
}

async fn merge_batch(
    backend: &S3Backend,
    catalog: &Catalog,
    projection_id: i64,
    batch: &[FileMetaRow],
) -> ProviderResult<()> {
    let now = Utc::now();
    let n_y = catalog
        .get_projection(projection_id)
        .await?
        .ok_or_else(|| WeatherError::Catalog(format!("unknown projection {projection_id}")))?
        .n_y as u32;

    // Step 1-2: for each source artifact, the live bands (columns still
    // worth keeping) and their new, packed offsets in the merged artifact.
    let mut live_by_source: HashMap<String, Vec<BandRow>> = HashMap::new();
    for artifact in batch {
        let bands = catalog.live_bands_for_file(&artifact.file_name, now).await?;
        if !bands.is_empty() {
            live_by_source.insert(artifact.file_name.clone(), bands);
        }
    }
    if live_by_source.is_empty() {
        return Ok(());
    }

    let mut new_offset: i64 = 0;
    let mut repoints: Vec<(String, i64, i64)> = Vec::new(); // (old_file, old_offset, new_offset)
    // Deterministic order: iterate sources in the batch's FileMeta order so
    // the packed layout is reproducible given the same inputs.
    let mut ordered_sources: Vec<&String> = Vec::new();
    for artifact in batch {
        if live_by_source.contains_key(&artifact.file_name) {
            ordered_sources.push(&artifact.file_name);
        }
    }

    for source in &ordered_sources {
        let bands = &live_by_source[*source];
        for band in bands {
            repoints.push((source.to_string(), band.offset_bytes, new_offset));
            new_offset += 4 * band.vals_per_loc as i64;
        }
    }
    let new_loc_size = new_offset;

    // Step 3: deterministic new name from the concatenated input names.
    let mut hasher = Sha256::new();
    for source in &ordered_sources {
        hasher.update(source.as_bytes());
    }
    let new_file_name = format!("merged-{:x}", hasher.finalize())[..40].to_string();

    // Step 4
    catalog
        .insert_merged_file_meta(&new_file_name, projection_id, new_loc_size)
        .await?;

    // Step 5: per-y-stripe read, repack, reupload with a bounded pool.
    let store = backend.store().clone();
    let semaphore = Arc::new(Semaphore::new(STRIPE_CONCURRENCY));
    let mut tasks = Vec::new();

    for y in 0..n_y {
        let store = store.clone();
        let semaphore = semaphore.clone();
        let sources: Vec<SourceStripe> = ordered_sources
            .iter()
            .map(|s| {
                let source_artifact = batch.iter().find(|f| &f.file_name == *s).unwrap();
                let bands = &live_by_source[*s];
                SourceStripe {
                    file_name: s.to_string(),
                    loc_size: source_artifact.loc_size as usize,
                    bands: bands
                        .iter()
                        .map(|b| (b.offset_bytes as usize, b.vals_per_loc as usize * 4))
                        .collect(),
                }
            })
            .collect();
        let new_file_name = new_file_name.clone();
        let new_loc_size = new_loc_size as usize;

        tasks.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            merge_stripe(&store, y, &sources, new_loc_size, &new_file_name).await
        }));
    }

    let mut any_failed = false;
    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "stripe merge failed");
                any_failed = true;
            }
            Err(e) => {
                warn!(error = %e, "stripe merge task panicked");
                any_failed = true;
            }
        }
    }

    if any_failed {
        warn!(new_file_name, "merge incomplete, leaving source bands in place for cleaner to collect partial object");
        return Ok(());
    }

    // Step 6: repoint bands only after every stripe landed.
    for (old_file, old_offset, new_offset) in repoints {
        catalog
            .repoint_band(&old_file, old_offset, &new_file_name, new_offset)
            .await?;
    }

    info!(
        projection_id,
        n_sources = ordered_sources.len(),
        new_file_name,
        "merged artifacts"
    );
    Ok(())
}

/// One source artifact's live-band layout, as needed to repack a single
/// y-stripe: which byte ranges of each (x,y) column survive into the merge.
struct SourceStripe {
    file_name: String,
    loc_size: usize,
    /// (old_offset, byte_length) per surviving band, in the merged artifact's
    /// output order.
    bands: Vec<(usize, usize)>,
}

/// Read one y-stripe from each source artifact, keep only the bytes backing
/// still-live bands, and reassemble them into the merged artifact's row.
async fn merge_stripe(
    store: &crate::object_store::ObjectStorage,
    y: u32,
    sources: &[SourceStripe],
    new_loc_size: usize,
    new_file_name: &str,
) -> ProviderResult<()> {
    let mut per_source_rows = Vec::with_capacity(sources.len());
    for source in sources {
        let path = StoragePath::row(y, &source.file_name);
        let row = store.get(&path).await?;
        per_source_rows.push(row);
    }

    let n_x = match per_source_rows.first().zip(sources.first()) {
        Some((row, source)) if source.loc_size > 0 => row.len() / source.loc_size,
        _ => return Ok(()),
    };
    let mut merged = vec![0u8; n_x * new_loc_size];

    let mut running_new_offset = 0usize;
    for (row, source) in per_source_rows.iter().zip(sources) {
        for (old_offset, n_bytes) in &source.bands {
            for x in 0..n_x {
                let src = x * source.loc_size + old_offset;
                let dst = x * new_loc_size + running_new_offset;
                merged[dst..dst + n_bytes].copy_from_slice(&row[src..src + n_bytes]);
            }
            running_new_offset += n_bytes;
        }
    }

    let path = StoragePath::row(y, new_file_name);
    store.put(&path, bytes::Bytes::from(merged)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::catalog::{Catalog, NewBand};
    use crate::object_store::{ObjectStorage, ObjectStorageConfig, StoragePath};

    #[test]
    fn batch_size_policy_merges_everything_up_to_the_cap() {
        let pick = |n: usize| n.min(MAX_BATCH_SIZE);
        assert_eq!(pick(8), 8);
        assert_eq!(pick(12), 12);
        assert_eq!(pick(50), 50);
        assert_eq!(pick(100), 50);
        assert_eq!(pick(400), 50);
    }

    /// §8 Scenario 2: 12 one-band artifacts for one projection merge into a
    /// single new FileMeta with `loc_size = 4*12`. Needs a real Postgres
    /// (`TEST_DATABASE_URL`) and MinIO/S3 (`TEST_S3_*`) instance; run with
    /// `cargo test --package storage -- --ignored merges_twelve`.
    #[tokio::test]
    #[ignore]
    async fn merges_twelve_one_band_artifacts_into_a_single_file() {
        let Some(base_url) = test_utils::db::test_database_url() else {
            eprintln!("SKIPPED: TEST_DATABASE_URL not set");
            return;
        };
        let schema = test_utils::db::ScratchSchema::create(&base_url, "merge_scenario_2")
            .await
            .expect("create scratch schema");

        let catalog = Catalog::connect(&schema.url()).await.expect("connect catalog");
        catalog.migrate().await.expect("migrate");

        let store = ObjectStorage::new(&ObjectStorageConfig::default()).expect("object storage");
        let backend = S3Backend::new(store.clone());

        let source_id: i64 = sqlx::query_scalar(
            "INSERT INTO sources (short_name, display_name, source_url) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind("scenario2")
        .bind("Scenario 2 fixture source")
        .bind("https://example.invalid")
        .fetch_one(catalog.pool())
        .await
        .expect("insert source");

        let metric_id: i64 = sqlx::query_scalar(
            "INSERT INTO metrics (name, units) VALUES ($1, $2) RETURNING id",
        )
        .bind("scenario2_metric")
        .bind("K")
        .fetch_one(catalog.pool())
        .await
        .expect("insert metric");

        let projection_id = catalog
            .find_or_create_projection(1, 1, 1, &[0.0], &[0.0])
            .await
            .expect("create projection");

        let field_id: i64 = sqlx::query_scalar(
            "INSERT INTO source_fields (source_id, metric_id, projection_id, index_short_name, index_level) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(source_id)
        .bind(metric_id)
        .bind(projection_id)
        .bind("TMP")
        .bind("surface")
        .fetch_one(catalog.pool())
        .await
        .expect("insert source_field");

        let now = Utc::now();
        for i in 0..12u8 {
            let file_name = format!("scenario2src{i:02}");
            let band = NewBand { offset: 0, source_field_id: field_id, valid_time: now, run_time: now, vals_per_loc: 1 };
            catalog
                .commit_artifact(&file_name, projection_id, 4, &[band])
                .await
                .expect("commit one-band artifact");
            store
                .put(&StoragePath::row(0, &file_name), bytes::Bytes::from_static(&[0u8; 4]))
                .await
                .expect("write row object");
        }

        run(&backend, &catalog).await.expect("run merge");

        let artifacts = catalog
            .artifacts_for_projection(projection_id)
            .await
            .expect("list artifacts");
        assert!(
            artifacts.iter().any(|a| a.loc_size == 4 * 12),
            "expected a merged artifact with loc_size=48, got {:?}",
            artifacts.iter().map(|a| a.loc_size).collect::<Vec<_>>()
        );

        schema.drop().await.expect("drop scratch schema");
    }
}
