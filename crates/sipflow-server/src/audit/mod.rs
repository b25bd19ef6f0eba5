//! Audit log
//!
//! The audit logger consumes the ingest event stream on its own task and
//! records one [`AuditEntry`] per audited event. Only `SipCreated` is audited
//! today; every other variant is skipped.
//!
//! # Usage
//!
//! ```rust,ignore
//! let cancel = CancellationToken::new();
//! let handle = audit::AuditLogger::new(Arc::new(audit::TracingAuditSink))
//!     .spawn(events.as_ref(), cancel.clone())?;
//! // ...
//! cancel.cancel();
//! handle.await?;
//! ```

use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::event::{EventError, EventService, IngestEvent};

pub const SIP_INGEST: &str = "SIP.ingest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub msg: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub resource_id: Uuid,
    /// UUID of the acting user, empty when unknown.
    pub user: String,
}

impl AuditEntry {
    pub fn from_event(event: &IngestEvent) -> Option<Self> {
        match event {
            IngestEvent::SipCreated(created) => Some(Self {
                msg: "SIP ingest started",
                kind: SIP_INGEST,
                resource_id: created.uuid,
                user: created
                    .item
                    .uploader
                    .as_ref()
                    .map(|u| u.uuid.to_string())
                    .unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Writes entries as `tracing` events on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: &AuditEntry) {
        info!(
            target: "audit",
            r#type = entry.kind,
            resource_id = %entry.resource_id,
            user = %entry.user,
            "{}",
            entry.msg
        );
    }
}

#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Subscribe now and consume events on a new task until `cancel` fires.
    pub fn spawn(
        &self,
        events: &dyn EventService<IngestEvent>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, EventError> {
        let mut subscription = events.subscribe(cancel)?;
        let sink = self.sink.clone();

        Ok(tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if let Some(entry) = AuditEntry::from_event(&event) {
                    sink.record(&entry);
                }
            }
            debug!("Audit logger stopped");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::InMemoryEventService;
    use crate::models::{Sip, SipStatus, User};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<AuditEntry>>);

    impl AuditSink for Recorder {
        fn record(&self, entry: &AuditEntry) {
            self.0.lock().unwrap().push(entry.clone());
        }
    }

    #[test]
    fn test_only_sip_created_is_audited() {
        let mut sip = Sip::new(Uuid::new_v4(), "sip.zip", SipStatus::Queued);
        let entry = AuditEntry::from_event(&IngestEvent::sip_created(sip.clone())).unwrap();
        assert_eq!(entry.kind, "SIP.ingest");
        assert_eq!(entry.msg, "SIP ingest started");
        assert_eq!(entry.resource_id, sip.uuid);
        assert_eq!(entry.user, "");

        let user = Uuid::new_v4();
        sip.uploader = Some(User {
            uuid: user,
            ..Default::default()
        });
        let entry = AuditEntry::from_event(&IngestEvent::sip_created(sip.clone())).unwrap();
        assert_eq!(entry.user, user.to_string());

        assert!(AuditEntry::from_event(&IngestEvent::sip_updated(sip)).is_none());
        assert!(AuditEntry::from_event(&IngestEvent::ping("Ping")).is_none());
    }

    #[tokio::test]
    async fn test_logger_records_and_stops_on_cancel() {
        let events = InMemoryEventService::<IngestEvent>::new();
        let recorder = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();

        let handle = AuditLogger::new(recorder.clone())
            .spawn(&events, cancel.clone())
            .unwrap();

        let sip = Sip::new(Uuid::new_v4(), "sip.zip", SipStatus::Queued);
        events.publish_event(IngestEvent::sip_updated(sip.clone()));
        events.publish_event(IngestEvent::sip_created(sip.clone()));

        while recorder.0.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        handle.await.unwrap();

        let entries = recorder.0.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].resource_id, sip.uuid);
        assert_eq!(events.subscriber_count(), 0);
    }
}
