use serde::{Deserialize, Serialize};
use sipflow_common::env;
use std::sync::Arc;

use super::{MemoryBucket, S3Bucket, SharedBucket};

/// URL selecting the in-memory bucket.
pub const MEMORY_URL: &str = "mem://";

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl S3Config {
    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: DEFAULT_REGION.to_string(),
            bucket: bucket.into(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketConfig {
    Memory,
    S3(S3Config),
}

impl BucketConfig {
    /// Read `{prefix}_URL` or the `{prefix}_S3_*` variables.
    ///
    /// Returns `None` when neither is set.
    pub fn from_env(prefix: &str) -> anyhow::Result<Option<Self>> {
        if let Some(url) = env::var(&format!("{prefix}_URL")) {
            if url == MEMORY_URL {
                return Ok(Some(BucketConfig::Memory));
            }
            anyhow::bail!("unsupported {prefix}_URL: {url:?}, expected {MEMORY_URL:?}");
        }

        let Some(bucket) = env::var(&format!("{prefix}_S3_BUCKET")) else {
            return Ok(None);
        };

        Ok(Some(BucketConfig::S3(S3Config {
            endpoint: env::var(&format!("{prefix}_S3_ENDPOINT")),
            region: env::var_or(&format!("{prefix}_S3_REGION"), DEFAULT_REGION),
            bucket,
            access_key: env::var(&format!("{prefix}_S3_ACCESS_KEY")),
            secret_key: env::var(&format!("{prefix}_S3_SECRET_KEY")),
            path_style: env::parse_or(&format!("{prefix}_S3_PATH_STYLE"), false)?,
        })))
    }

    pub async fn open(&self) -> SharedBucket {
        match self {
            BucketConfig::Memory => Arc::new(MemoryBucket::new()),
            BucketConfig::S3(config) => Arc::new(S3Bucket::new(config).await),
        }
    }
}
