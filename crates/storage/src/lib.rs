//! Storage abstractions for the ingest-to-query pipeline.
//!
//! - [`catalog`] — the PostgreSQL metadata Catalog (§3).
//! - [`queue`] — the durable work queue (§4.1).
//! - [`object_store`] — generic S3/MinIO client used by the object-store backend.
//! - [`provider`] — the `BlobProvider` enum dispatching to a concrete backend (§4.5).
//! - [`s3_backend`] / [`wide_column`] — the two backends (§4.5.1, §4.5.2).
//! - [`merge`] / [`clean`] — the Merger (§4.6) and Cleaner (§4.7).

pub mod bootstrap;
pub mod catalog;
pub mod clean;
pub mod merge;
pub mod object_store;
pub mod provider;
pub mod queue;
pub mod s3_backend;
pub mod wide_column;

pub use bootstrap::provider_from_env;
pub use catalog::Catalog;
pub use self::object_store::{ObjectStorage, ObjectStorageConfig, ObjectSummary, StorageStats};
pub use provider::{BlobProvider, FieldRef, PutBand};
pub use queue::{AckToken, Lease, Queue};
pub use s3_backend::S3Backend;
pub use wide_column::WideColumnBackend;
