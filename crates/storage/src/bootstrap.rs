//! Builds the configured `BlobProvider` from environment variables (§6.4),
//! shared by every service binary that needs one so the `DATA_PROVIDER`
//! switch lives in exactly one place.

use sqlx::PgPool;

use crate::object_store::{ObjectStorage, ObjectStorageConfig};
use crate::provider::BlobProvider;
use crate::s3_backend::S3Backend;
use crate::wide_column::WideColumnBackend;
use weather_common::WeatherError;

/// Reads `DATA_PROVIDER` (`s3` or `wide_column`, default `s3`) and the
/// backend-specific variables, then constructs and migrates the backend.
/// `catalog_pool` is reused for the wide-column backend so it doesn't open
/// a second connection pool to the same database.
pub async fn provider_from_env(catalog_pool: &PgPool) -> Result<BlobProvider, WeatherError> {
    let kind = std::env::var("DATA_PROVIDER").unwrap_or_else(|_| "s3".to_string());
    match kind.as_str() {
        "wide_column" => {
            let backend = WideColumnBackend::new(catalog_pool.clone());
            backend.migrate().await?;
            Ok(BlobProvider::WideColumn(backend))
        }
        _ => {
            let config = ObjectStorageConfig {
                endpoint: std::env::var("INGEST_S3_ENDPOINT").ok(),
                bucket: std::env::var("INGEST_S3_BUCKET").unwrap_or_else(|_| "weather-data".to_string()),
                access_key_id: std::env::var("INGEST_S3_ACCESS_KEY_ID").unwrap_or_else(|_| "minioadmin".to_string()),
                secret_access_key: std::env::var("INGEST_S3_SECRET_ACCESS_KEY")
                    .unwrap_or_else(|_| "minioadmin".to_string()),
                region: std::env::var("INGEST_S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                allow_http: std::env::var("INGEST_S3_ALLOW_HTTP").map(|v| v == "true").unwrap_or(true),
            };
            let store = ObjectStorage::new(&config)?;
            Ok(BlobProvider::S3(S3Backend::new(store)))
        }
    }
}
