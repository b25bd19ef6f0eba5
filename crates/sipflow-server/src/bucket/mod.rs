//! Object bucket abstraction
//!
//! The ingest coordinator and SIP sources only ever see [`Bucket`]; the S3 and
//! in-memory implementations are selected from configuration.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

pub mod config;
pub mod memory;
pub mod s3;

pub use config::{BucketConfig, S3Config};
pub use memory::MemoryBucket;
pub use s3::S3Bucket;

/// Separator used to group keys into directories when listing.
pub const DELIMITER: &str = "/";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BucketError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid list token")]
    InvalidToken,

    #[error("bucket error: {0}")]
    Backend(String),

    /// The body handed to a write failed while being read.
    #[error("read object body: {0}")]
    Body(String),
}

impl BucketError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        BucketError::Backend(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BucketError::NotFound(_))
    }
}

pub type Result<T, E = BucketError> = std::result::Result<T, E>;

/// Object body as a stream of chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ObjectAttributes {
    pub key: String,
    pub size: i64,
    pub mod_time: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectAttributes>,
    /// Present while more objects remain.
    pub next_token: Option<String>,
}

#[async_trait]
pub trait Bucket: Send + Sync {
    /// Open `key` for reading.
    async fn reader(&self, key: &str) -> Result<(ObjectAttributes, ByteStream)>;

    /// Stream `body` into `key`, returning the number of bytes written.
    async fn write_stream(
        &self,
        key: &str,
        body: ByteStream,
        content_type: Option<&str>,
    ) -> Result<u64>;

    async fn write_all(&self, key: &str, data: Bytes, content_type: Option<&str>) -> Result<()>;

    async fn read_all(&self, key: &str) -> Result<Bytes>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn attributes(&self, key: &str) -> Result<ObjectAttributes>;

    /// One page of the top-level listing, keys grouped by [`DELIMITER`].
    async fn list_page(&self, token: Option<&str>, limit: usize) -> Result<ListPage>;

    async fn delete(&self, key: &str) -> Result<()>;
}

pub type SharedBucket = Arc<dyn Bucket>;
