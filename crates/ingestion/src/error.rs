//! Error types for the ingestion crate, classified by §4.9's retry policy.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("index fetch failed: {0}")]
    IndexFetch(String),

    #[error("range download failed: {0}")]
    RangeDownload(String),

    #[error("source not yet published: {0}")]
    NotYetPublished(String),

    #[error("decode error: {0}")]
    Decode(#[from] grib2_parser::Grib2Error),

    #[error("projection error: {0}")]
    Projection(#[from] projection::ProjectionError),

    #[error("storage error: {0}")]
    Storage(#[from] weather_common::WeatherError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, IngestionError>;

impl IngestionError {
    /// Whether this failure should be retried with backoff (§4.9's
    /// "Transient failure -> Reschedule" edge) or treated as fatal and
    /// dropped without requeue. Only a configuration error (a SourceField
    /// with no matching source row) is fatal; everything else — including a
    /// decoder error on a partial file — gets a retry.
    pub fn is_transient(&self) -> bool {
        !matches!(self, IngestionError::Config(_))
    }
}
