//! Submit a SIP from the configured SIP source

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Claims;
use crate::ingest::{check_claims, IngestError, IngestService, NewSip, Result};
use crate::models::WorkflowType;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitSipCommand {
    /// Identifier of the SIP source holding the package.
    pub source_id: String,

    /// Object key of the package in the SIP source.
    pub key: String,

    #[serde(rename = "type", default)]
    pub workflow_type: WorkflowType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitSipResponse {
    pub uuid: Uuid,
}

impl SubmitSipCommand {
    pub fn new(source_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<Uuid> {
        let source_id =
            Uuid::parse_str(&self.source_id).map_err(|_| IngestError::not_valid("invalid source ID"))?;
        if self.key.is_empty() {
            return Err(IngestError::not_valid("missing key"));
        }
        Ok(source_id)
    }

    #[tracing::instrument(skip(self, ingest, claims), fields(source_id = %self.source_id, key = %self.key))]
    pub async fn handle(
        self,
        ingest: &IngestService,
        claims: Option<&Claims>,
    ) -> Result<SubmitSipResponse> {
        let source_id = self.validate()?;
        check_claims(claims)?;

        let sip = ingest
            .init_sip(NewSip {
                uuid: ingest.new_uuid(),
                name: self.key.clone(),
                key: self.key,
                workflow_type: self.workflow_type,
                extension: self.extension,
                sip_source_id: Some(source_id),
                retention: ingest.sip_source.retention_period(),
                claims,
            })
            .await?;

        Ok(SubmitSipResponse { uuid: sip.uuid })
    }
}
