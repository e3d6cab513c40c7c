//! Shared error type for the weather aggregation services.

use thiserror::Error;

/// Result type alias using [`WeatherError`].
pub type WeatherResult<T> = Result<T, WeatherError>;

/// Error type shared across crate boundaries in this workspace.
///
/// Each crate that needs finer-grained variants (catalog, blob store,
/// GRIB2 parsing, the queue) defines its own `thiserror` enum and converts
/// into this one at the binary boundary; this type exists for the cases
/// that genuinely cross crate lines (config loading, HTTP surfacing).
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("missing required configuration: {0}")]
    MissingConfig(String),

    #[error("invalid configuration value for '{key}': {message}")]
    InvalidConfig { key: String, message: String },

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("blob store error: {0}")]
    Blob(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("not covered by any configured projection")]
    NotCovered,

    #[error("invalid query parameter '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl WeatherError {
    /// HTTP status code this error should surface as on the query API (§7).
    pub fn http_status_code(&self) -> u16 {
        match self {
            WeatherError::InvalidConfig { .. }
            | WeatherError::InvalidParameter { .. }
            | WeatherError::NotCovered => 400,
            WeatherError::MissingConfig(_) => 500,
            WeatherError::Catalog(_) | WeatherError::Blob(_) | WeatherError::Queue(_) => 503,
            WeatherError::Decode(_) | WeatherError::Internal(_) => 500,
        }
    }
}

impl From<std::io::Error> for WeatherError {
    fn from(err: std::io::Error) -> Self {
        WeatherError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for WeatherError {
    fn from(err: serde_json::Error) -> Self {
        WeatherError::Internal(format!("json error: {}", err))
    }
}
