//! The uniform `DataProvider` capability (§4.5) and its compile-time
//! dispatch over the two concrete backends.
//!
//! Modeled as an enum rather than `dyn DataProvider`: the backend is chosen
//! once at startup from `DATA_PROVIDER` and never swapped at runtime, and
//! there are only ever two variants, so a `match` at the handful of call
//! sites costs nothing next to the indirection a trait object would add.

use chrono::{DateTime, Utc};

use crate::catalog::{Catalog, DataPointSet};
use crate::object_store::ObjectStorage;
use crate::s3_backend::S3Backend;
use crate::wide_column::WideColumnBackend;
use weather_common::WeatherError;

pub type ProviderResult<T> = Result<T, WeatherError>;

/// One decoded (field, valid_time, run_time) array to be written under a
/// projection. `values` is row-major (y-major, x-minor), `vals_per_loc`
/// members interleaved per (x,y) location — `vals_per_loc` is 1 except for
/// ensemble fields.
#[derive(Debug, Clone)]
pub struct PutBand {
    pub source_field_id: i64,
    pub valid_time: DateTime<Utc>,
    pub run_time: DateTime<Utc>,
    pub vals_per_loc: u32,
    pub values: Vec<f32>,
}

/// A SourceField identity as the query service needs it to label results;
/// kept out of the catalog's `SourceField` type so this crate's backends
/// don't need to know about metrics.
#[derive(Debug, Clone, Copy)]
pub struct FieldRef {
    pub source_field_id: i64,
    pub metric_id: i64,
}

#[derive(Clone)]
pub enum BlobProvider {
    S3(S3Backend),
    WideColumn(WideColumnBackend),
}

impl BlobProvider {
    pub async fn put_fields(
        &self,
        catalog: &Catalog,
        projection_id: i64,
        n_x: u32,
        n_y: u32,
        bands: Vec<PutBand>,
    ) -> ProviderResult<()> {
        match self {
            BlobProvider::S3(backend) => backend.put_fields(catalog, projection_id, n_x, n_y, bands).await,
            BlobProvider::WideColumn(backend) => backend.put_fields(catalog, projection_id, n_x, n_y, bands).await,
        }
    }

    pub async fn get_fields(
        &self,
        catalog: &Catalog,
        projection_id: i64,
        xy: (u32, u32),
        fields: &[FieldRef],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Vec<DataPointSet>> {
        match self {
            BlobProvider::S3(backend) => backend.get_fields(catalog, projection_id, xy, fields, start, end).await,
            BlobProvider::WideColumn(backend) => {
                backend.get_fields(catalog, projection_id, xy, fields, start, end).await
            }
        }
    }

    /// Drop expired bands and reclaim storage (§4.7). The Catalog-level
    /// bookkeeping (steps 1-3) is shared; only the blob-object deletion in
    /// step 3/4 differs per backend.
    pub async fn clean(&self, catalog: &Catalog, retention: chrono::Duration) -> ProviderResult<()> {
        crate::clean::run(self, catalog, retention).await
    }

    /// Compact small artifacts into larger ones (§4.6). No-op for the
    /// wide-column backend, whose layout is already merged by row.
    pub async fn merge(&self, catalog: &Catalog) -> ProviderResult<()> {
        match self {
            BlobProvider::S3(backend) => crate::merge::run(backend, catalog).await,
            BlobProvider::WideColumn(_) => Ok(()),
        }
    }

    pub(crate) fn object_store(&self) -> Option<&ObjectStorage> {
        match self {
            BlobProvider::S3(backend) => Some(backend.store()),
            BlobProvider::WideColumn(_) => None,
        }
    }
}
