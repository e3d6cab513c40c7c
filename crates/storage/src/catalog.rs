//! Metadata catalog using PostgreSQL: sources, metrics, fields, projections,
//! locations, and band metadata (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

use weather_common::WeatherError;

pub type CatalogResult<T> = Result<T, WeatherError>;

/// Database connection pool and catalog operations.
#[derive(Clone)]
pub struct Catalog {
    pool: PgPool,
}

impl Catalog {
    pub async fn connect(database_url: &str) -> CatalogResult<Self> {
        Self::connect_with_pool_size(database_url, 10).await
    }

    pub async fn connect_with_pool_size(database_url: &str, max_connections: u32) -> CatalogResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| WeatherError::Catalog(format!("connection failed: {e}")))?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> CatalogResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| WeatherError::Catalog(format!("migration failed: {e}")))?;
            }
        }
        Ok(())
    }

    // ----- Sources & metrics (seeded at bootstrap, read at ingest/query time) -----

    pub async fn get_source_by_short_name(&self, short_name: &str) -> CatalogResult<Option<Source>> {
        sqlx::query_as::<_, Source>(
            "SELECT id, short_name, display_name, source_url, last_updated FROM sources WHERE short_name = $1",
        )
        .bind(short_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WeatherError::Catalog(format!("query failed: {e}")))
    }

    pub async fn list_sources(&self) -> CatalogResult<Vec<Source>> {
        sqlx::query_as::<_, Source>(
            "SELECT id, short_name, display_name, source_url, last_updated FROM sources ORDER BY short_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WeatherError::Catalog(format!("query failed: {e}")))
    }

    pub async fn touch_source(&self, source_id: i64) -> CatalogResult<()> {
        sqlx::query("UPDATE sources SET last_updated = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(|e| WeatherError::Catalog(format!("update failed: {e}")))?;
        Ok(())
    }

    pub async fn list_metrics(&self) -> CatalogResult<Vec<Metric>> {
        sqlx::query_as::<_, Metric>(
            "SELECT id, name, units, intermediate FROM metrics ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WeatherError::Catalog(format!("query failed: {e}")))
    }

    /// SourceFields for a source, used by the worker to know what to extract
    /// from an index file (§4.2) and by the query service to resolve metrics
    /// to fields (§4.8).
    pub async fn source_fields_for_source(&self, source_id: i64) -> CatalogResult<Vec<SourceField>> {
        sqlx::query_as::<_, SourceField>(
            "SELECT id, source_id, metric_id, projection_id, index_short_name, index_level, selectors \
             FROM source_fields WHERE source_id = $1",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WeatherError::Catalog(format!("query failed: {e}")))
    }

    /// SourceFields matching a metric filter, restricted to fields that have
    /// resolved a projection and whose metric is not intermediate — the
    /// first step of §4.8's query algorithm.
    pub async fn source_fields_for_metrics(&self, metric_ids: &[i64]) -> CatalogResult<Vec<SourceField>> {
        let rows = sqlx::query_as::<_, SourceField>(
            "SELECT sf.id, sf.source_id, sf.metric_id, sf.projection_id, sf.index_short_name, sf.index_level, sf.selectors \
             FROM source_fields sf \
             JOIN metrics m ON m.id = sf.metric_id \
             WHERE sf.projection_id IS NOT NULL \
               AND m.intermediate = FALSE \
               AND ($1::bigint[] IS NULL OR sf.metric_id = ANY($1))",
        )
        .bind(if metric_ids.is_empty() { None } else { Some(metric_ids) })
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WeatherError::Catalog(format!("query failed: {e}")))?;
        Ok(rows)
    }

    /// Set a SourceField's projection on first sighting. Last-writer-wins on
    /// conflict, per §5's shared-resource policy.
    pub async fn set_source_field_projection(&self, field_id: i64, projection_id: i64) -> CatalogResult<()> {
        sqlx::query("UPDATE source_fields SET projection_id = $1 WHERE id = $2")
            .bind(projection_id)
            .bind(field_id)
            .execute(&self.pool)
            .await
            .map_err(|e| WeatherError::Catalog(format!("update failed: {e}")))?;
        Ok(())
    }

    // ----- Projections -----

    /// Look up a projection by its grid identity, creating it if this is the
    /// first sighting of this grid (§4.3).
    pub async fn find_or_create_projection(
        &self,
        ll_hash: i64,
        n_x: i32,
        n_y: i32,
        lats: &[f64],
        lons: &[f64],
    ) -> CatalogResult<i64> {
        if let Some(id) = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM projections WHERE ll_hash = $1 AND n_x = $2 AND n_y = $3",
        )
        .bind(ll_hash)
        .bind(n_x)
        .bind(n_y)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WeatherError::Catalog(format!("query failed: {e}")))?
        {
            return Ok(id);
        }

        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO projections (ll_hash, n_x, n_y, lats, lons) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (ll_hash, n_x, n_y) DO UPDATE SET ll_hash = EXCLUDED.ll_hash \
             RETURNING id",
        )
        .bind(ll_hash)
        .bind(n_x)
        .bind(n_y)
        .bind(lats)
        .bind(lons)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| WeatherError::Catalog(format!("insert failed: {e}")))?;

        Ok(id)
    }

    pub async fn get_projection(&self, projection_id: i64) -> CatalogResult<Option<ProjectionRow>> {
        sqlx::query_as::<_, ProjectionRow>(
            "SELECT id, ll_hash, n_x, n_y, lats, lons FROM projections WHERE id = $1",
        )
        .bind(projection_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WeatherError::Catalog(format!("query failed: {e}")))
    }

    // ----- Locations (§6.3 /location/search) -----

    pub async fn search_locations(&self, query: &str, limit: i64) -> CatalogResult<Vec<Location>> {
        let pattern = format!("%{}%", query.to_lowercase());
        sqlx::query_as::<_, Location>(
            "SELECT id, lat, lon, name, population FROM locations \
             WHERE LOWER(name) LIKE $1 \
             ORDER BY population DESC NULLS LAST LIMIT $2",
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WeatherError::Catalog(format!("query failed: {e}")))
    }

    // ----- Writer: atomic commit of one ingest task's bands (§5 ordering guarantee) -----

    /// Insert a new artifact (`FileMeta`) and its bands in a single
    /// transaction, so the Catalog commit is atomic with the blob writes it
    /// describes.
    pub async fn commit_artifact(
        &self,
        file_name: &str,
        projection_id: i64,
        loc_size: i64,
        bands: &[NewBand],
    ) -> CatalogResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WeatherError::Catalog(format!("begin tx failed: {e}")))?;

        sqlx::query(
            "INSERT INTO file_meta (file_name, projection_id, ctime, loc_size) VALUES ($1, $2, $3, $4)",
        )
        .bind(file_name)
        .bind(projection_id)
        .bind(Utc::now())
        .bind(loc_size)
        .execute(&mut *tx)
        .await
        .map_err(|e| WeatherError::Catalog(format!("insert file_meta failed: {e}")))?;

        for band in bands {
            sqlx::query(
                "INSERT INTO file_band_meta (file_name, offset_bytes, source_field_id, valid_time, run_time, vals_per_loc) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(file_name)
            .bind(band.offset)
            .bind(band.source_field_id)
            .bind(band.valid_time)
            .bind(band.run_time)
            .bind(band.vals_per_loc)
            .execute(&mut *tx)
            .await
            .map_err(|e| WeatherError::Catalog(format!("insert file_band_meta failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| WeatherError::Catalog(format!("commit failed: {e}")))?;
        Ok(())
    }

    /// Bands matching a projection/field/time-range query, used by both
    /// backends' `get_fields` to know which artifacts and offsets to read.
    pub async fn find_bands(
        &self,
        projection_id: i64,
        source_field_ids: &[i64],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CatalogResult<Vec<BandRow>> {
        sqlx::query_as::<_, BandRow>(
            "SELECT b.file_name, b.offset_bytes, b.source_field_id, b.valid_time, b.run_time, b.vals_per_loc, f.loc_size \
             FROM file_band_meta b \
             JOIN file_meta f ON f.file_name = b.file_name \
             WHERE f.projection_id = $1 \
               AND b.source_field_id = ANY($2) \
               AND b.valid_time >= $3 AND b.valid_time < $4 \
             ORDER BY b.valid_time ASC, b.run_time ASC",
        )
        .bind(projection_id)
        .bind(source_field_ids)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WeatherError::Catalog(format!("query failed: {e}")))
    }

    pub async fn file_meta(&self, file_name: &str) -> CatalogResult<Option<FileMetaRow>> {
        sqlx::query_as::<_, FileMetaRow>(
            "SELECT file_name, projection_id, ctime, loc_size FROM file_meta WHERE file_name = $1",
        )
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WeatherError::Catalog(format!("query failed: {e}")))
    }

    // ----- Merger (§4.6) -----

    /// FileMeta rows with at least one band, grouped implicitly by
    /// projection via the caller iterating `n_y`, ordered ascending by
    /// `loc_size` as the policy requires.
    pub async fn artifacts_for_projection(&self, projection_id: i64) -> CatalogResult<Vec<FileMetaRow>> {
        sqlx::query_as::<_, FileMetaRow>(
            "SELECT DISTINCT f.file_name, f.projection_id, f.ctime, f.loc_size \
             FROM file_meta f \
             JOIN file_band_meta b ON b.file_name = f.file_name \
             WHERE f.projection_id = $1 \
             ORDER BY f.loc_size ASC",
        )
        .bind(projection_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WeatherError::Catalog(format!("query failed: {e}")))
    }

    pub async fn all_projection_ids(&self) -> CatalogResult<Vec<i64>> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM projections ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| WeatherError::Catalog(format!("query failed: {e}")))
    }

    pub async fn live_bands_for_file(&self, file_name: &str, now: DateTime<Utc>) -> CatalogResult<Vec<BandRow>> {
        sqlx::query_as::<_, BandRow>(
            "SELECT b.file_name, b.offset_bytes, b.source_field_id, b.valid_time, b.run_time, b.vals_per_loc, f.loc_size \
             FROM file_band_meta b \
             JOIN file_meta f ON f.file_name = b.file_name \
             WHERE b.file_name = $1 AND b.valid_time >= $2",
        )
        .bind(file_name)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WeatherError::Catalog(format!("query failed: {e}")))
    }

    /// Insert the merged artifact's FileMeta, then repoint the given bands'
    /// `file_name`/`offset` to it. Performed as separate statements per
    /// §4.6 step 6: the new FileMeta must be visible before repointing so a
    /// crash mid-merge leaves an orphan FileMeta rather than dangling bands.
    pub async fn insert_merged_file_meta(&self, file_name: &str, projection_id: i64, loc_size: i64) -> CatalogResult<()> {
        sqlx::query(
            "INSERT INTO file_meta (file_name, projection_id, ctime, loc_size) VALUES ($1, $2, $3, $4)",
        )
        .bind(file_name)
        .bind(projection_id)
        .bind(Utc::now())
        .bind(loc_size)
        .execute(&self.pool)
        .await
        .map_err(|e| WeatherError::Catalog(format!("insert failed: {e}")))?;
        Ok(())
    }

    pub async fn repoint_band(
        &self,
        old_file_name: &str,
        old_offset: i64,
        new_file_name: &str,
        new_offset: i64,
    ) -> CatalogResult<()> {
        sqlx::query(
            "UPDATE file_band_meta SET file_name = $1, offset_bytes = $2 \
             WHERE file_name = $3 AND offset_bytes = $4",
        )
        .bind(new_file_name)
        .bind(new_offset)
        .bind(old_file_name)
        .bind(old_offset)
        .execute(&self.pool)
        .await
        .map_err(|e| WeatherError::Catalog(format!("update failed: {e}")))?;
        Ok(())
    }

    // ----- Cleaner (§4.7) -----

    pub async fn delete_expired_bands(&self, retention: chrono::Duration) -> CatalogResult<u64> {
        let cutoff = Utc::now() - retention;
        let result = sqlx::query("DELETE FROM file_band_meta WHERE valid_time < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| WeatherError::Catalog(format!("delete failed: {e}")))?;
        Ok(result.rows_affected())
    }

    /// For each (source_field_id, valid_time) older than 1h, keep only the
    /// row with the max run_time.
    pub async fn delete_superseded_runs(&self) -> CatalogResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let result = sqlx::query(
            "DELETE FROM file_band_meta b \
             WHERE b.valid_time < $1 \
               AND b.run_time < ( \
                 SELECT MAX(b2.run_time) FROM file_band_meta b2 \
                 WHERE b2.source_field_id = b.source_field_id AND b2.valid_time = b.valid_time \
               )",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| WeatherError::Catalog(format!("delete failed: {e}")))?;
        Ok(result.rows_affected())
    }

    /// FileMeta rows with no remaining bands, old enough to be safe to
    /// reclaim (ctime <= now - 1h, so a just-written artifact mid-commit
    /// isn't raced).
    pub async fn orphaned_file_meta(&self) -> CatalogResult<Vec<FileMetaRow>> {
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        sqlx::query_as::<_, FileMetaRow>(
            "SELECT f.file_name, f.projection_id, f.ctime, f.loc_size FROM file_meta f \
             WHERE f.ctime <= $1 \
               AND NOT EXISTS (SELECT 1 FROM file_band_meta b WHERE b.file_name = f.file_name)",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WeatherError::Catalog(format!("query failed: {e}")))
    }

    pub async fn delete_file_meta(&self, file_name: &str) -> CatalogResult<()> {
        sqlx::query("DELETE FROM file_meta WHERE file_name = $1")
            .bind(file_name)
            .execute(&self.pool)
            .await
            .map_err(|e| WeatherError::Catalog(format!("delete failed: {e}")))?;
        Ok(())
    }

    pub async fn all_file_names(&self) -> CatalogResult<Vec<String>> {
        sqlx::query_scalar::<_, String>("SELECT file_name FROM file_meta")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| WeatherError::Catalog(format!("query failed: {e}")))
    }
}

// ----- Row / domain types -----

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub short_name: String,
    pub display_name: String,
    pub source_url: String,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Metric {
    pub id: i64,
    pub name: String,
    pub units: String,
    pub intermediate: bool,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SourceField {
    pub id: i64,
    pub source_id: i64,
    pub metric_id: i64,
    pub projection_id: Option<i64>,
    pub index_short_name: String,
    pub index_level: String,
    pub selectors: JsonValue,
}

#[derive(Debug, Clone, FromRow)]
pub struct ProjectionRow {
    pub id: i64,
    pub ll_hash: i64,
    pub n_x: i32,
    pub n_y: i32,
    pub lats: Vec<f64>,
    pub lons: Vec<f64>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    pub name: String,
    pub population: Option<i64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FileMetaRow {
    pub file_name: String,
    pub projection_id: i64,
    pub ctime: DateTime<Utc>,
    pub loc_size: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct BandRow {
    pub file_name: String,
    pub offset_bytes: i64,
    pub source_field_id: i64,
    pub valid_time: DateTime<Utc>,
    pub run_time: DateTime<Utc>,
    pub vals_per_loc: i32,
    pub loc_size: i64,
}

/// A band to be written as part of a new artifact, before it has a
/// Catalog-assigned identity.
#[derive(Debug, Clone)]
pub struct NewBand {
    pub offset: i64,
    pub source_field_id: i64,
    pub valid_time: DateTime<Utc>,
    pub run_time: DateTime<Utc>,
    pub vals_per_loc: i32,
}

/// A fully materialized query result, transient per §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPointSet {
    pub values: Vec<f32>,
    pub metric_id: i64,
    pub valid_time: DateTime<Utc>,
    pub source_field_id: Option<i64>,
    pub run_time: Option<DateTime<Utc>>,
    pub derived: bool,
    pub synthesized: bool,
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    id BIGSERIAL PRIMARY KEY,
    short_name VARCHAR(50) NOT NULL UNIQUE,
    display_name VARCHAR(200) NOT NULL,
    source_url TEXT NOT NULL,
    last_updated TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS metrics (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(100) NOT NULL UNIQUE,
    units VARCHAR(50) NOT NULL,
    intermediate BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE IF NOT EXISTS projections (
    id BIGSERIAL PRIMARY KEY,
    ll_hash BIGINT NOT NULL,
    n_x INTEGER NOT NULL,
    n_y INTEGER NOT NULL,
    lats DOUBLE PRECISION[] NOT NULL,
    lons DOUBLE PRECISION[] NOT NULL,
    UNIQUE(ll_hash, n_x, n_y)
);

CREATE TABLE IF NOT EXISTS source_fields (
    id BIGSERIAL PRIMARY KEY,
    source_id BIGINT NOT NULL REFERENCES sources(id),
    metric_id BIGINT NOT NULL REFERENCES metrics(id),
    projection_id BIGINT REFERENCES projections(id),
    index_short_name VARCHAR(50) NOT NULL,
    index_level VARCHAR(50) NOT NULL,
    selectors JSONB NOT NULL DEFAULT '{}',
    UNIQUE(source_id, metric_id)
);

CREATE TABLE IF NOT EXISTS locations (
    id BIGSERIAL PRIMARY KEY,
    lat DOUBLE PRECISION NOT NULL,
    lon DOUBLE PRECISION NOT NULL,
    name VARCHAR(200) NOT NULL,
    population BIGINT
);

CREATE INDEX IF NOT EXISTS idx_locations_name ON locations(LOWER(name));

CREATE TABLE IF NOT EXISTS file_meta (
    file_name VARCHAR(64) PRIMARY KEY,
    projection_id BIGINT NOT NULL REFERENCES projections(id),
    ctime TIMESTAMPTZ NOT NULL,
    loc_size BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_file_meta_projection ON file_meta(projection_id);

CREATE TABLE IF NOT EXISTS file_band_meta (
    file_name VARCHAR(64) NOT NULL REFERENCES file_meta(file_name),
    offset_bytes BIGINT NOT NULL,
    source_field_id BIGINT NOT NULL REFERENCES source_fields(id),
    valid_time TIMESTAMPTZ NOT NULL,
    run_time TIMESTAMPTZ NOT NULL,
    vals_per_loc INTEGER NOT NULL,
    PRIMARY KEY (file_name, offset_bytes)
);

CREATE INDEX IF NOT EXISTS idx_file_band_meta_field_time ON file_band_meta(source_field_id, valid_time);
"#;
