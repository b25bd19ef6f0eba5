//! Download of failed SIPs and PIPs kept in the internal bucket
//!
//! A download takes two calls: the first checks that the file exists and
//! issues a ticket bound to the caller's claims, the second redeems the
//! ticket and streams the file.

use tracing::{debug, error};

use crate::auth::Claims;
use crate::bucket::ByteStream;
use crate::ingest::{IngestError, IngestService, Result, TicketResponse};
use crate::models::Sip;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadMeta {
    pub content_type: String,
    pub content_length: i64,
    pub content_disposition: String,
}

fn failed_key(sip: &Sip) -> Result<&str> {
    match (sip.failed_as, sip.failed_key.as_deref()) {
        (Some(_), Some(key)) if !key.is_empty() => Ok(key),
        _ => Err(IngestError::not_valid("SIP has no failed values")),
    }
}

fn file_not_found(sip: &Sip) -> IngestError {
    IngestError::SipNotFound {
        uuid: sip.uuid.to_string(),
        message: "Failed SIP/PIP file not found in the internal storage".into(),
    }
}

impl IngestService {
    #[tracing::instrument(skip(self, claims))]
    pub async fn download_failed_request(
        &self,
        claims: Option<&Claims>,
        uuid: &str,
    ) -> Result<TicketResponse> {
        let sip = self.read_sip(uuid).await?;
        let key = failed_key(&sip)?;

        let exists = self.internal_bucket.exists(key).await.map_err(|e| {
            error!(error = %e, key, "Cannot check failed file");
            IngestError::internal("error checking failed file")
        })?;
        if !exists {
            return Err(file_not_found(&sip));
        }

        let ticket = self.tickets.request(claims).await.map_err(|e| {
            error!(error = %e, "Cannot request ticket");
            IngestError::internal("ticket request failed")
        })?;
        Ok(TicketResponse { ticket })
    }

    #[tracing::instrument(skip(self, ticket))]
    pub async fn download_failed(
        &self,
        ticket: &str,
        uuid: &str,
    ) -> Result<(DownloadMeta, ByteStream)> {
        self.tickets.check(ticket).await.map_err(|e| {
            debug!(error = %e, "Download ticket rejected");
            IngestError::Unauthorized
        })?;

        let sip = self.read_sip(uuid).await?;
        let key = failed_key(&sip)?;

        let (attrs, body) = self.internal_bucket.reader(key).await.map_err(|e| {
            if e.is_not_found() {
                file_not_found(&sip)
            } else {
                error!(error = %e, key, "Cannot open failed file");
                IngestError::internal("error reading failed file")
            }
        })?;

        let meta = DownloadMeta {
            content_type: attrs
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            content_length: attrs.size,
            content_disposition: format!("attachment; filename=\"{key}\""),
        };
        Ok((meta, body))
    }
}
