//! Review decisions on SIPs awaiting acceptance

use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::engine::{ReviewPerformedSignal, REVIEW_PERFORMED_SIGNAL};
use crate::ingest::{parse_uuid, IngestError, IngestService, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmSipCommand {
    /// Storage location the AIP is placed in.
    pub location_id: Uuid,
}

impl ConfirmSipCommand {
    #[tracing::instrument(skip(self, ingest), fields(location_id = %self.location_id))]
    pub async fn handle(self, ingest: &IngestService, sip_uuid: &str) -> Result<()> {
        let signal = ReviewPerformedSignal {
            accepted: true,
            location_id: Some(self.location_id),
        };
        ingest.review(sip_uuid, signal).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectSipCommand;

impl RejectSipCommand {
    #[tracing::instrument(skip(self, ingest))]
    pub async fn handle(self, ingest: &IngestService, sip_uuid: &str) -> Result<()> {
        let signal = ReviewPerformedSignal {
            accepted: false,
            location_id: None,
        };
        ingest.review(sip_uuid, signal).await
    }
}

impl IngestService {
    async fn review(&self, sip_uuid: &str, signal: ReviewPerformedSignal) -> Result<()> {
        let sip_uuid = parse_uuid(sip_uuid)?;
        let workflows = self
            .persistence
            .list_workflows(sip_uuid)
            .await
            .map_err(|e| IngestError::from_read(e, "list workflows"))?;

        // Exactly one workflow can be waiting for the decision.
        let [workflow] = workflows.as_slice() else {
            return Err(IngestError::not_available());
        };

        let payload = serde_json::to_value(signal).map_err(|e| {
            error!(error = %e, "Cannot encode review signal");
            IngestError::internal("cannot encode review signal")
        })?;
        self.engine
            .signal_workflow(&workflow.temporal_id, None, REVIEW_PERFORMED_SIGNAL, payload)
            .await
            .map_err(|e| {
                error!(error = %e, workflow_id = %workflow.temporal_id, "Cannot signal workflow");
                IngestError::not_available()
            })?;

        info!(sip = %sip_uuid, accepted = signal.accepted, "Review performed");
        Ok(())
    }
}
