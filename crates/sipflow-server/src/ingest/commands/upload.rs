//! Upload a SIP as a multipart body
//!
//! Only the first part is kept; it is streamed into the upload bucket under
//! its file name and a SIP is submitted for it.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use multer::{Constraints, Multipart, SizeLimit};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::auth::Claims;
use crate::bucket::BucketError;
use crate::ingest::{check_claims, IngestError, IngestService, NewSip, Result};
use crate::models::WorkflowType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSipResponse {
    pub uuid: Uuid,
}

fn invalid_multipart(message: &str) -> IngestError {
    IngestError::InvalidMultipartRequest(message.to_string())
}

impl IngestService {
    /// Store the first part of a multipart `body` and submit it as a SIP.
    #[tracing::instrument(skip(self, claims, body))]
    pub async fn upload<S, E>(
        &self,
        claims: Option<&Claims>,
        content_type: &str,
        body: S,
    ) -> Result<UploadSipResponse>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        check_claims(claims)?;

        let boundary = multer::parse_boundary(content_type)
            .map_err(|_| IngestError::InvalidMediaType("invalid media type".into()))?;
        let constraints = Constraints::new()
            .size_limit(SizeLimit::new().whole_stream(self.settings.upload_max_size));
        let mut multipart = Multipart::with_constraints(body, boundary, constraints);

        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(invalid_multipart("missing file part in upload")),
            Err(e) => {
                debug!(error = %e, "Cannot read multipart body");
                return Err(invalid_multipart("invalid multipart request"));
            },
        };
        let key = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(invalid_multipart("missing file name in upload")),
        };
        let part_type = field.content_type().map(|m| m.to_string());

        let data = field
            .map(|chunk| chunk.map_err(|e| BucketError::Body(e.to_string())))
            .boxed();
        let written = self
            .upload_bucket
            .write_stream(&key, data, part_type.as_deref())
            .await
            .map_err(|e| match e {
                BucketError::Body(message) => {
                    debug!(error = %message, key, "Cannot read upload part");
                    invalid_multipart("invalid multipart request")
                },
                other => {
                    error!(error = %other, key, "Cannot store upload");
                    IngestError::internal("cannot store upload")
                },
            })?;
        debug!(key, written, "Stored upload");

        let result = self
            .init_sip(NewSip {
                uuid: self.new_uuid(),
                name: key.clone(),
                key: key.clone(),
                workflow_type: WorkflowType::default(),
                extension: None,
                sip_source_id: None,
                retention: self.settings.upload_retention,
                claims,
            })
            .await;

        match result {
            Ok(sip) => Ok(UploadSipResponse { uuid: sip.uuid }),
            Err(err) => {
                if let Err(delete_err) = self.upload_bucket.delete(&key).await {
                    warn!(error = %delete_err, key, "Cannot delete upload after failed submit");
                }
                Err(err)
            },
        }
    }
}
