use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::Region,
    primitives::ByteStream as S3ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{debug, info, instrument, warn};

use super::config::S3Config;
use super::{Bucket, BucketError, ByteStream, ListPage, ObjectAttributes, Result, DELIMITER};

/// Minimum S3 multipart part size; smaller bodies use a single `PutObject`.
const PART_SIZE: usize = 8 * 1024 * 1024;

#[derive(Clone)]
pub struct S3Bucket {
    client: Client,
    bucket: String,
}

impl std::fmt::Debug for S3Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Bucket").field("bucket", &self.bucket).finish()
    }
}

impl S3Bucket {
    /// Build a client from `config`; without static keys the default AWS
    /// credential chain is used.
    pub async fn new(config: &S3Config) -> Self {
        let region = Region::new(config.region.clone());

        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => aws_sdk_s3::Config::builder()
                .behavior_version_latest()
                .credentials_provider(Credentials::new(
                    access_key,
                    secret_key,
                    None,
                    None,
                    "sipflow-bucket",
                )),
            _ => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(region.clone())
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        };

        builder = builder.region(region).force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(bucket = %config.bucket, "S3 bucket client initialized");

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }

    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .body(S3ByteStream::from(data))
            .send()
            .await
            .map_err(|e| BucketError::backend(format!("put {key}: {e}")))?;
        Ok(())
    }

    async fn put_multipart(
        &self,
        key: &str,
        first: Bytes,
        body: &mut ByteStream,
        content_type: Option<&str>,
    ) -> Result<u64> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| BucketError::backend(format!("create multipart upload {key}: {e}")))?;
        let upload_id = upload
            .upload_id()
            .ok_or_else(|| BucketError::backend(format!("multipart upload {key}: missing id")))?
            .to_string();

        match self.upload_parts(key, &upload_id, first, body).await {
            Ok((parts, written)) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| {
                        BucketError::backend(format!("complete multipart upload {key}: {e}"))
                    })?;
                Ok(written)
            },
            Err(err) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key, error = %abort_err, "Failed to abort multipart upload");
                }
                Err(err)
            },
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Bytes,
        body: &mut ByteStream,
    ) -> Result<(Vec<CompletedPart>, u64)> {
        let mut parts = Vec::new();
        let mut written = 0u64;
        let mut pending = Some(first);
        let mut buf = BytesMut::new();
        let mut exhausted = false;

        while !exhausted || pending.is_some() {
            let part = match pending.take() {
                Some(part) => part,
                None => {
                    while buf.len() < PART_SIZE {
                        match body.next().await {
                            Some(chunk) => buf.extend_from_slice(&chunk?),
                            None => {
                                exhausted = true;
                                break;
                            },
                        }
                    }
                    if buf.is_empty() {
                        break;
                    }
                    buf.split().freeze()
                },
            };

            let number = i32::try_from(parts.len() + 1)
                .map_err(|_| BucketError::backend(format!("upload {key}: too many parts")))?;
            written += part.len() as u64;
            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(number)
                .body(S3ByteStream::from(part))
                .send()
                .await
                .map_err(|e| BucketError::backend(format!("upload part {number} of {key}: {e}")))?;
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(number)
                    .build(),
            );
        }

        Ok((parts, written))
    }
}

fn to_chrono(t: Option<&aws_sdk_s3::primitives::DateTime>) -> Option<DateTime<Utc>> {
    t.and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
}

#[async_trait]
impl Bucket for S3Bucket {
    #[instrument(skip(self))]
    async fn reader(&self, key: &str) -> Result<(ObjectAttributes, ByteStream)> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(se) if se.is_no_such_key() => BucketError::NotFound(key.to_string()),
                _ => BucketError::backend(format!("get {key}: {e}")),
            })?;

        let attrs = ObjectAttributes {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0),
            mod_time: to_chrono(response.last_modified()),
            content_type: response.content_type().map(str::to_string),
            is_dir: false,
        };

        let body = futures::stream::unfold(response.body, |mut body| async move {
            body.next()
                .await
                .map(|chunk| (chunk.map_err(BucketError::backend), body))
        });

        Ok((attrs, body.boxed()))
    }

    #[instrument(skip(self, body))]
    async fn write_stream(
        &self,
        key: &str,
        mut body: ByteStream,
        content_type: Option<&str>,
    ) -> Result<u64> {
        let mut buf = BytesMut::new();
        while buf.len() < PART_SIZE {
            match body.next().await {
                Some(chunk) => buf.extend_from_slice(&chunk?),
                None => {
                    let written = buf.len() as u64;
                    self.put(key, buf.freeze(), content_type).await?;
                    debug!(key, written, "Stored object");
                    return Ok(written);
                },
            }
        }

        let written = self
            .put_multipart(key, buf.freeze(), &mut body, content_type)
            .await?;
        debug!(key, written, "Stored object with multipart upload");
        Ok(written)
    }

    #[instrument(skip(self, data))]
    async fn write_all(&self, key: &str, data: Bytes, content_type: Option<&str>) -> Result<()> {
        self.put(key, data, content_type).await
    }

    #[instrument(skip(self))]
    async fn read_all(&self, key: &str) -> Result<Bytes> {
        let (_, mut body) = self.reader(key).await?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    #[instrument(skip(self))]
    async fn exists(&self, key: &str) -> Result<bool> {
        match self.attributes(key).await {
            Ok(_) => Ok(true),
            Err(BucketError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn attributes(&self, key: &str) -> Result<ObjectAttributes> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(se) if se.is_not_found() => BucketError::NotFound(key.to_string()),
                _ => BucketError::backend(format!("head {key}: {e}")),
            })?;

        Ok(ObjectAttributes {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0),
            mod_time: to_chrono(response.last_modified()),
            content_type: response.content_type().map(str::to_string),
            is_dir: false,
        })
    }

    #[instrument(skip(self))]
    async fn list_page(&self, token: Option<&str>, limit: usize) -> Result<ListPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .delimiter(DELIMITER)
            .max_keys(i32::try_from(limit.max(1)).unwrap_or(i32::MAX))
            .set_continuation_token(token.map(str::to_string))
            .send()
            .await
            .map_err(|e| BucketError::backend(format!("list: {e}")))?;

        let mut objects: Vec<ObjectAttributes> = response
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| ObjectAttributes {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0),
                    mod_time: to_chrono(obj.last_modified()),
                    content_type: None,
                    is_dir: false,
                })
            })
            .collect();
        objects.extend(response.common_prefixes().iter().filter_map(|p| {
            p.prefix().map(|prefix| ObjectAttributes {
                key: prefix.to_string(),
                is_dir: true,
                ..Default::default()
            })
        }));
        objects.sort_by(|a, b| a.key.cmp(&b.key));

        let next_token = match response.is_truncated() {
            Some(true) => response.next_continuation_token().map(str::to_string),
            _ => None,
        };

        Ok(ListPage {
            objects,
            next_token,
        })
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BucketError::backend(format!("delete {key}: {e}")))?;
        debug!(key, "Deleted object");
        Ok(())
    }
}
