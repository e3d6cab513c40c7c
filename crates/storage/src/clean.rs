//! Retention cleanup (§4.7): expired bands, superseded runs, orphaned
//! FileMeta, and orphaned blob objects left behind by partial merges or
//! crashes between Catalog and blob-store writes.

use chrono::{Duration, Utc};
use tracing::{info, instrument, warn};

use crate::catalog::Catalog;
use crate::object_store::StoragePath;
use crate::provider::{BlobProvider, ProviderResult};

const ORPHAN_SCAN_AGE: Duration = Duration::hours(3);
const ORPHAN_DELETE_BATCH: usize = 1000;

#[instrument(skip(provider, catalog))]
pub async fn run(provider: &BlobProvider, catalog: &Catalog, retention: Duration) -> ProviderResult<()> {
    let expired = catalog.delete_expired_bands(retention).await?;
    info!(expired, "deleted expired bands");

    let superseded = catalog.delete_superseded_runs().await?;
    info!(superseded, "deleted superseded runs");

    let orphaned = catalog.orphaned_file_meta().await?;
    let Some(store) = provider.object_store() else {
        // Wide-column layout has no per-y objects to collect; Catalog
        // bookkeeping above is all the cleanup it needs.
        return Ok(());
    };

    let mut live_names = catalog.all_file_names().await?.into_iter().collect::<std::collections::HashSet<_>>();

    for artifact in &orphaned {
        let projection = catalog.get_projection(artifact.projection_id).await?;
        let n_y = projection.map(|p| p.n_y).unwrap_or(0);
        for y in 0..n_y {
            let path = StoragePath::row(y as u32, &artifact.file_name);
            if let Err(e) = store.delete(&path).await {
                warn!(path, error = %e, "failed to delete orphaned object, will retry next cycle");
            }
        }
        catalog.delete_file_meta(&artifact.file_name).await?;
        live_names.remove(&artifact.file_name);
    }
    info!(count = orphaned.len(), "deleted orphaned file_meta and objects");

    // Belt-and-suspenders sweep: objects whose file_name isn't in FileMeta at
    // all (a crash between writing the object and committing FileMeta, or
    // between repointing bands and deleting the merge source) and that are
    // old enough not to be an in-flight write.
    let cutoff = Utc::now() - ORPHAN_SCAN_AGE;
    let all_objects = store.list_with_meta("").await?;
    let mut stale_paths = Vec::new();
    for object in all_objects {
        if object.last_modified > cutoff {
            continue;
        }
        let Some((_, file_name)) = object.path.split_once('/') else {
            continue;
        };
        if live_names.contains(file_name) {
            continue;
        }
        stale_paths.push(object.path);
    }

    let mut deleted = 0usize;
    for batch in stale_paths.chunks(ORPHAN_DELETE_BATCH) {
        for path in batch {
            if let Err(e) = store.delete(path).await {
                warn!(path, error = %e, "failed to delete stale object");
            } else {
                deleted += 1;
            }
        }
    }
    info!(deleted, "swept stale blob objects with no FileMeta");

    Ok(())
}
