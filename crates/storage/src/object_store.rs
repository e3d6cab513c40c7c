//! Generic object storage client (MinIO/S3 compatible), used by the
//! object-store backend (§4.5.1) for both raw artifact rows and (indirectly)
//! by the merger when rewriting them.

use bytes::Bytes;
use object_store::{aws::AmazonS3Builder, path::Path, ObjectStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

use weather_common::WeatherError;

pub type StorageResult<T> = Result<T, WeatherError>;

/// Configuration for the S3/MinIO connection (§6.4 `INGEST_S3_*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    pub endpoint: Option<String>,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub allow_http: bool,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: Some("http://minio:9000".to_string()),
            bucket: "weather-data".to_string(),
            access_key_id: "minioadmin".to_string(),
            secret_access_key: "minioadmin".to_string(),
            region: "us-east-1".to_string(),
            allow_http: true,
        }
    }
}

/// Thin wrapper over `object_store`'s S3 client.
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectStorage {
    pub fn new(config: &ObjectStorageConfig) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_region(&config.region);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| WeatherError::Blob(format!("failed to create S3 client: {e}")))?;

        Ok(Self {
            store: Arc::new(store),
            bucket: config.bucket.clone(),
        })
    }

    #[instrument(skip(self, data), fields(bucket = %self.bucket, path = %path))]
    pub async fn put(&self, path: &str, data: Bytes) -> StorageResult<()> {
        let location = Path::from(path);
        debug!(size = data.len(), "writing object");
        self.store
            .put(&location, data.into())
            .await
            .map_err(|e| WeatherError::Blob(format!("failed to write {path}: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket, path = %path))]
    pub async fn get(&self, path: &str) -> StorageResult<Bytes> {
        let location = Path::from(path);
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| WeatherError::Blob(format!("failed to read {path}: {e}")))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| WeatherError::Blob(format!("failed to read bytes: {e}")))?;
        Ok(bytes)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket, path = %path))]
    pub async fn get_range(&self, path: &str, start: usize, end: usize) -> StorageResult<Bytes> {
        let location = Path::from(path);
        self.store
            .get_range(&location, start..end)
            .await
            .map_err(|e| WeatherError::Blob(format!("failed to read range {path}: {e}")))
    }

    pub async fn exists(&self, path: &str) -> StorageResult<bool> {
        let location = Path::from(path);
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(WeatherError::Blob(format!("failed to check {path}: {e}"))),
        }
    }

    pub async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .list_with_meta(prefix)
            .await?
            .into_iter()
            .map(|o| o.path)
            .collect())
    }

    pub async fn list_with_meta(&self, prefix: &str) -> StorageResult<Vec<ObjectSummary>> {
        use futures::TryStreamExt;

        let prefix_path = if prefix.is_empty() { None } else { Some(Path::from(prefix)) };
        let mut objects = Vec::new();
        let mut stream = self.store.list(prefix_path.as_ref());
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| WeatherError::Blob(format!("list failed: {e}")))?
        {
            objects.push(ObjectSummary {
                path: meta.location.to_string(),
                last_modified: meta.last_modified,
                size: meta.size as u64,
            });
        }
        Ok(objects)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket, path = %path))]
    pub async fn delete(&self, path: &str) -> StorageResult<()> {
        let location = Path::from(path);
        self.store
            .delete(&location)
            .await
            .map_err(|e| WeatherError::Blob(format!("failed to delete {path}: {e}")))?;
        Ok(())
    }

    pub async fn stats(&self) -> StorageResult<StorageStats> {
        use futures::TryStreamExt;

        let mut total_size: u64 = 0;
        let mut object_count: u64 = 0;
        let mut stream = self.store.list(None);
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| WeatherError::Blob(format!("list failed: {e}")))?
        {
            total_size += meta.size as u64;
            object_count += 1;
        }

        Ok(StorageStats {
            total_size,
            object_count,
            bucket: self.bucket.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_size: u64,
    pub object_count: u64,
    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub path: String,
    pub last_modified: chrono::DateTime<chrono::Utc>,
    pub size: u64,
}

/// Path builder for the object-store backend's y-sharded row layout (§4.5.1).
pub struct StoragePath;

impl StoragePath {
    /// `"{y}/{file_name}"` — one object per grid row per artifact.
    pub fn row(y: u32, file_name: &str) -> String {
        format!("{y}/{file_name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_path_matches_layout() {
        assert_eq!(StoragePath::row(42, "abc123"), "42/abc123");
    }
}
