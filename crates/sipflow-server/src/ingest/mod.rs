//! Ingest coordinator
//!
//! [`IngestService`] owns the ingest use cases: submitting SIPs from a SIP
//! source or an upload, recording workflow progress reported by the engine,
//! review decisions, listings, failed package downloads and the live monitor
//! stream.
//!
//! # Structure
//!
//! - `commands`: operations that change state and publish events
//! - `queries`: read-only operations
//! - `monitor`: the authenticated event stream
//! - `batches`: batch endpoints, not yet implemented
//!
//! Events are published only after the persistence write they describe has
//! committed.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError};
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::ticket::SharedRng;
use crate::auth::{self, Claims, TicketProvider};
use crate::bucket::SharedBucket;
use crate::engine::{self, ProcessingWorkflowRequest, WorkflowEngine};
use crate::event::{EventService, IngestEvent};
use crate::models::{Sip, SipStatus, User, WorkflowType};
use crate::persistence::Service;
use crate::sipsource::{RetentionPeriod, SipSource};

pub mod batches;
pub mod commands;
pub mod error;
pub mod monitor;
pub mod queries;

pub use error::{IngestError, InternalCause, Result};

/// Upload size limit applied when none is configured: 4 GiB.
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 4 << 30;

pub const DEFAULT_TASK_QUEUE: &str = "global";

/// Collaborators of the coordinator.
#[derive(Clone)]
pub struct IngestComponents {
    pub persistence: Arc<dyn Service>,
    pub events: Arc<dyn EventService<IngestEvent>>,
    pub engine: Arc<dyn WorkflowEngine>,
    pub tickets: TicketProvider,
    /// Holds failed SIPs and PIPs.
    pub internal_bucket: SharedBucket,
    /// Receives uploaded SIPs.
    pub upload_bucket: SharedBucket,
    pub sip_source: Arc<dyn SipSource>,
    /// `None` when no SIP source is configured.
    pub sip_source_id: Option<Uuid>,
    pub rng: SharedRng,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    pub task_queue: String,
    pub upload_max_size: u64,
    pub upload_retention: RetentionPeriod,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            task_queue: DEFAULT_TASK_QUEUE.to_string(),
            upload_max_size: DEFAULT_UPLOAD_MAX_SIZE,
            upload_retention: RetentionPeriod::Forever,
        }
    }
}

#[derive(Clone)]
pub struct IngestService {
    pub(crate) persistence: Arc<dyn Service>,
    pub(crate) events: Arc<dyn EventService<IngestEvent>>,
    pub(crate) engine: Arc<dyn WorkflowEngine>,
    pub(crate) tickets: TicketProvider,
    pub(crate) internal_bucket: SharedBucket,
    pub(crate) upload_bucket: SharedBucket,
    pub(crate) sip_source: Arc<dyn SipSource>,
    pub(crate) sip_source_id: Option<Uuid>,
    pub(crate) settings: IngestSettings,
    rng: SharedRng,
}

impl fmt::Debug for IngestService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestService")
            .field("tickets", &self.tickets)
            .field("sip_source_id", &self.sip_source_id)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Ticket authenticating the next monitor or download call. `None` when
/// authentication is disabled.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TicketResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
}

/// Parameters of a new SIP and its processing workflow.
#[derive(Debug, Clone)]
pub(crate) struct NewSip<'a> {
    pub uuid: Uuid,
    pub name: String,
    pub key: String,
    pub workflow_type: WorkflowType,
    pub extension: Option<String>,
    pub sip_source_id: Option<Uuid>,
    pub retention: RetentionPeriod,
    pub claims: Option<&'a Claims>,
}

impl IngestService {
    pub fn new(components: IngestComponents, settings: IngestSettings) -> Self {
        Self {
            persistence: components.persistence,
            events: components.events,
            engine: components.engine,
            tickets: components.tickets,
            internal_bucket: components.internal_bucket,
            upload_bucket: components.upload_bucket,
            sip_source: components.sip_source,
            sip_source_id: components.sip_source_id,
            settings,
            rng: components.rng,
        }
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub fn tickets(&self) -> &TicketProvider {
        &self.tickets
    }

    pub fn events(&self) -> &Arc<dyn EventService<IngestEvent>> {
        &self.events
    }

    /// Random (v4) UUID drawn from the configured generator.
    pub(crate) fn new_uuid(&self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }

    pub(crate) fn publish(&self, event: IngestEvent) {
        self.events.publish_event(event);
    }

    /// Persist a queued SIP and start its processing workflow.
    ///
    /// The SIP row is deleted again when the workflow cannot be started.
    #[tracing::instrument(skip(self, new), fields(sip = %new.uuid, key = %new.key))]
    pub(crate) async fn init_sip(&self, new: NewSip<'_>) -> Result<Sip> {
        let mut sip = Sip::new(new.uuid, new.name.clone(), SipStatus::Queued);
        if let Some(claims) = new.claims {
            sip.uploader = Some(User {
                uuid: self.new_uuid(),
                email: Some(claims.email.clone()).filter(|e| !e.is_empty()),
                name: Some(claims.name.clone()).filter(|n| !n.is_empty()),
                oidc_iss: Some(claims.iss.clone()),
                oidc_sub: Some(claims.sub.clone()),
                ..Default::default()
            });
        }

        let sip = self
            .persistence
            .create_sip(sip)
            .await
            .map_err(|e| IngestError::from_write(e, "create SIP"))?;

        let request = ProcessingWorkflowRequest {
            sip_uuid: sip.uuid,
            sip_name: sip.name.clone(),
            workflow_type: new.workflow_type,
            key: new.key,
            sip_source_id: new.sip_source_id,
            retention_period_secs: new.retention.as_secs(),
            extension: new.extension,
        };
        if let Err(err) =
            engine::init_processing_workflow(self.engine.as_ref(), &self.settings.task_queue, &request)
                .await
        {
            let cause = match self.persistence.delete_sip(sip.id).await {
                Ok(()) => {
                    error!(error = %err, sip = %sip.uuid, "Cannot start processing workflow");
                    err.to_string()
                },
                Err(delete_err) => {
                    error!(
                        error = %err,
                        delete_error = %delete_err,
                        sip = %sip.uuid,
                        "Cannot start processing workflow; SIP left behind"
                    );
                    format!("{err}; delete SIP: {delete_err}")
                },
            };
            return Err(
                IngestError::internal("error starting processing workflow").with_cause(cause)
            );
        }

        info!(sip = %sip.uuid, workflow_type = %request.workflow_type, "SIP submitted");
        self.publish(IngestEvent::sip_created(sip.clone()));
        Ok(sip)
    }
}

/// Reject a request whose claims lack any of `required`.
pub fn authorize(claims: Option<&Claims>, required: &[&str]) -> Result<()> {
    if auth::check_attributes(claims, required) {
        Ok(())
    } else {
        Err(IngestError::Forbidden)
    }
}

/// Claims of an uploader must identify the user at the issuer.
pub(crate) fn check_claims(claims: Option<&Claims>) -> Result<()> {
    let Some(claims) = claims else {
        return Ok(());
    };
    if claims.iss.is_empty() {
        return Err(IngestError::not_valid("invalid user claims: missing Iss"));
    }
    if claims.sub.is_empty() {
        return Err(IngestError::not_valid("invalid user claims: missing Sub"));
    }
    Ok(())
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|_| IngestError::not_valid("invalid UUID"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_claims() {
        assert!(check_claims(None).is_ok());

        let mut claims = Claims {
            sub: "u1".into(),
            ..Default::default()
        };
        assert_eq!(
            check_claims(Some(&claims)),
            Err(IngestError::not_valid("invalid user claims: missing Iss"))
        );

        claims.iss = "https://idp".into();
        claims.sub.clear();
        assert_eq!(
            check_claims(Some(&claims)),
            Err(IngestError::not_valid("invalid user claims: missing Sub"))
        );
    }

    #[test]
    fn test_authorize() {
        let claims = Claims {
            attributes: Some(vec![auth::SIPS_READ.into()]),
            ..Default::default()
        };
        assert!(authorize(None, &[auth::SIPS_LIST]).is_ok());
        assert!(authorize(Some(&claims), &[auth::SIPS_READ]).is_ok());
        assert_eq!(
            authorize(Some(&claims), &[auth::SIPS_LIST]),
            Err(IngestError::Forbidden)
        );
    }
}
