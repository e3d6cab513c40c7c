//! Object-store (range-read) backend (§4.5.1).
//!
//! One logical artifact per ingest, physically stored as `n_y` row objects
//! `"{y}/{file_name}"`. Each row packs, for every x, the bytes of every band
//! in insertion order — so a point read is one ranged GET per candidate row
//! plus a slice per band.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::catalog::{Catalog, DataPointSet, NewBand};
use crate::object_store::{ObjectStorage, StoragePath};
use crate::provider::{FieldRef, ProviderResult, PutBand};
use weather_common::WeatherError;

const WRITE_CONCURRENCY: usize = 32;
const READ_CONCURRENCY: usize = 16;
const MAX_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct S3Backend {
    store: Arc<ObjectStorage>,
}

impl S3Backend {
    pub fn new(store: ObjectStorage) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn store(&self) -> &ObjectStorage {
        &self.store
    }

    #[instrument(skip(self, catalog, bands), fields(projection_id, n_bands = bands.len()))]
    pub async fn put_fields(
        &self,
        catalog: &Catalog,
        projection_id: i64,
        n_x: u32,
        n_y: u32,
        bands: Vec<PutBand>,
    ) -> ProviderResult<()> {
        if bands.is_empty() {
            return Ok(());
        }

        let file_name = Uuid::new_v4().simple().to_string();

        let mut offsets = Vec::with_capacity(bands.len());
        let mut offset: i64 = 0;
        for band in &bands {
            offsets.push(offset);
            offset += 4 * band.vals_per_loc as i64;
        }
        let loc_size = offset;

        let n_x = n_x as usize;
        let n_y = n_y as usize;
        let bands = Arc::new(bands);
        let offsets = Arc::new(offsets);

        let semaphore = Arc::new(Semaphore::new(WRITE_CONCURRENCY));
        let mut uploads = FuturesUnordered::new();

        for y in 0..n_y {
            let bands = bands.clone();
            let offsets = offsets.clone();
            let store = self.store.clone();
            let file_name = file_name.clone();
            let semaphore = semaphore.clone();
            uploads.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let row = build_row(&bands, &offsets, loc_size as usize, n_x, y);
                put_with_retry(&store, &StoragePath::row(y as u32, &file_name), row).await
            }));
        }

        while let Some(result) = uploads.next().await {
            result
                .map_err(|e| WeatherError::Blob(format!("row upload task panicked: {e}")))??;
        }

        let new_bands: Vec<NewBand> = bands
            .iter()
            .zip(offsets.iter())
            .map(|(band, &offset)| NewBand {
                offset,
                source_field_id: band.source_field_id,
                valid_time: band.valid_time,
                run_time: band.run_time,
                vals_per_loc: band.vals_per_loc as i32,
            })
            .collect();

        catalog
            .commit_artifact(&file_name, projection_id, loc_size, &new_bands)
            .await?;

        Ok(())
    }

    #[instrument(skip(self, catalog, fields))]
    pub async fn get_fields(
        &self,
        catalog: &Catalog,
        projection_id: i64,
        xy: (u32, u32),
        fields: &[FieldRef],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Vec<DataPointSet>> {
        let (x, y) = xy;
        let metric_by_field: HashMap<i64, i64> =
            fields.iter().map(|f| (f.source_field_id, f.metric_id)).collect();
        let field_ids: Vec<i64> = fields.iter().map(|f| f.source_field_id).collect();

        let bands = catalog.find_bands(projection_id, &field_ids, start, end).await?;

        // Group by file_name so each artifact's row is fetched once even if
        // it carries several of the requested bands.
        let mut by_file: HashMap<String, Vec<crate::catalog::BandRow>> = HashMap::new();
        for band in bands {
            by_file.entry(band.file_name.clone()).or_default().push(band);
        }

        let semaphore = Arc::new(Semaphore::new(READ_CONCURRENCY));
        let mut reads = FuturesUnordered::new();

        for (file_name, file_bands) in by_file {
            let store = self.store.clone();
            let semaphore = semaphore.clone();
            let metric_by_field = metric_by_field.clone();
            reads.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let loc_size = file_bands[0].loc_size as usize;
                let path = StoragePath::row(y, &file_name);
                let range_start = x as usize * loc_size;
                let range_end = range_start + loc_size;
                let row = get_range_with_retry(&store, &path, range_start, range_end).await?;

                let mut points = Vec::with_capacity(file_bands.len());
                for band in file_bands {
                    let off = band.offset_bytes as usize;
                    let n = band.vals_per_loc as usize;
                    let slice = &row[off..off + n * 4];
                    let values: Vec<f32> = slice
                        .chunks_exact(4)
                        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                        .collect();
                    points.push(DataPointSet {
                        values,
                        metric_id: *metric_by_field.get(&band.source_field_id).unwrap_or(&0),
                        valid_time: band.valid_time,
                        source_field_id: Some(band.source_field_id),
                        run_time: Some(band.run_time),
                        derived: false,
                        synthesized: false,
                    });
                }
                Ok::<Vec<DataPointSet>, WeatherError>(points)
            }));
        }

        let mut all_points = Vec::new();
        while let Some(result) = reads.next().await {
            match result.map_err(|e| WeatherError::Blob(format!("read task panicked: {e}")))? {
                Ok(points) => all_points.extend(points),
                Err(e) => warn!(error = %e, "skipping unreadable artifact row"),
            }
        }

        all_points.sort_by_key(|p| (p.valid_time, p.run_time));
        Ok(all_points)
    }
}

fn build_row(bands: &[PutBand], offsets: &[i64], loc_size: usize, n_x: usize, y: usize) -> Bytes {
    let mut buf = vec![0u8; n_x * loc_size];
    for (band, &offset) in bands.iter().zip(offsets.iter()) {
        let vpl = band.vals_per_loc as usize;
        for x in 0..n_x {
            let src_start = (y * n_x + x) * vpl;
            let dst_start = x * loc_size + offset as usize;
            for m in 0..vpl {
                let bytes = band.values[src_start + m].to_le_bytes();
                buf[dst_start + m * 4..dst_start + m * 4 + 4].copy_from_slice(&bytes);
            }
        }
    }
    Bytes::from(buf)
}

async fn put_with_retry(store: &ObjectStorage, path: &str, data: Bytes) -> ProviderResult<()> {
    let mut last_err = None;
    for attempt in 0..MAX_RETRIES {
        match store.put(path, data.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(path, attempt, error = %e, "row upload failed, retrying");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap())
}

async fn get_range_with_retry(store: &ObjectStorage, path: &str, start: usize, end: usize) -> ProviderResult<Bytes> {
    let mut last_err = None;
    for attempt in 0..MAX_RETRIES {
        match store.get_range(path, start, end).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                warn!(path, attempt, error = %e, "range read failed, retrying");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_row_packs_bands_in_order() {
        // 2x1 grid, two bands: field A (vals_per_loc=1), field B (vals_per_loc=1)
        let bands = vec![
            PutBand {
                source_field_id: 1,
                valid_time: Utc::now(),
                run_time: Utc::now(),
                vals_per_loc: 1,
                values: vec![10.0, 20.0],
            },
            PutBand {
                source_field_id: 2,
                valid_time: Utc::now(),
                run_time: Utc::now(),
                vals_per_loc: 1,
                values: vec![1.0, 2.0],
            },
        ];
        let offsets = vec![0, 4];
        let row = build_row(&bands, &offsets, 8, 2, 0);
        assert_eq!(row.len(), 16);
        assert_eq!(f32::from_le_bytes(row[0..4].try_into().unwrap()), 10.0);
        assert_eq!(f32::from_le_bytes(row[4..8].try_into().unwrap()), 1.0);
        assert_eq!(f32::from_le_bytes(row[8..12].try_into().unwrap()), 20.0);
        assert_eq!(f32::from_le_bytes(row[12..16].try_into().unwrap()), 2.0);
    }

    #[test]
    fn build_row_round_trips_a_full_band_bitwise() {
        // A 10x10 field packed at its own offset must read back exactly,
        // since §8 requires bitwise float32 round trips through storage.
        let grid = test_utils::create_temperature_grid(10, 10);
        let bands = vec![PutBand {
            source_field_id: 7,
            valid_time: Utc::now(),
            run_time: Utc::now(),
            vals_per_loc: 1,
            values: grid.clone(),
        }];
        let offsets = vec![0];
        let row = build_row(&bands, &offsets, 4, 100, 0);
        for (i, &expected) in grid.iter().enumerate() {
            let bytes = &row[i * 4..i * 4 + 4];
            assert_eq!(f32::from_le_bytes(bytes.try_into().unwrap()), expected);
        }
    }
}
