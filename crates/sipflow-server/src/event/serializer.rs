//! Event envelope encoding

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("event serialization: {0}")]
pub struct SerializeError(#[from] serde_json::Error);

pub trait Serializer<E>: Send + Sync {
    fn marshal(&self, event: &E) -> Result<Vec<u8>, SerializeError>;

    fn unmarshal(&self, bytes: &[u8]) -> Result<E, SerializeError>;
}

/// JSON encoding, identical to what the monitor stream emits.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<E> Serializer<E> for JsonSerializer
where
    E: Serialize + DeserializeOwned,
{
    fn marshal(&self, event: &E) -> Result<Vec<u8>, SerializeError> {
        Ok(serde_json::to_vec(event)?)
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<E, SerializeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::IngestEvent;
    use crate::models::{
        FailedAs, Sip, SipStatus, Task, TaskStatus, User, Workflow, WorkflowStatus, WorkflowType,
    };
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn sip() -> Sip {
        let at = Utc.with_ymd_and_hms(2024, 8, 1, 12, 30, 0).unwrap();
        Sip {
            id: 7,
            aip_id: Some(Uuid::from_u128(9)),
            created_at: at,
            started_at: Some(at),
            failed_as: Some(FailedAs::Pip),
            failed_key: Some("failed/pip.zip".into()),
            uploader: Some(User {
                id: 3,
                uuid: Uuid::from_u128(4),
                email: Some("a@b".into()),
                name: Some("A".into()),
                created_at: at,
                ..Default::default()
            }),
            ..Sip::new(Uuid::from_u128(1), "sip.zip", SipStatus::Processing)
        }
    }

    #[test]
    fn test_round_trip_every_variant() {
        let workflow = Workflow {
            id: 2,
            uuid: Uuid::from_u128(2),
            temporal_id: "processing-workflow-1".into(),
            workflow_type: WorkflowType::CreateAndReviewAip,
            status: WorkflowStatus::InProgress,
            sip_uuid: Uuid::from_u128(1),
            ..Default::default()
        };
        let task = Task {
            id: 5,
            uuid: Uuid::from_u128(5),
            name: "Validate".into(),
            status: TaskStatus::Done,
            note: "ok".into(),
            workflow_id: 2,
            workflow_uuid: workflow.uuid,
            ..Default::default()
        };
        let events = vec![
            IngestEvent::ping("Hello"),
            IngestEvent::sip_created(sip()),
            IngestEvent::sip_updated(sip()),
            IngestEvent::sip_status_updated(Uuid::from_u128(1), SipStatus::Ingested),
            IngestEvent::workflow_created(workflow.clone()),
            IngestEvent::workflow_updated(workflow),
            IngestEvent::task_created(task.clone()),
            IngestEvent::task_updated(task),
        ];

        let serializer = JsonSerializer;
        for event in events {
            let bytes = serializer.marshal(&event).unwrap();
            let back: IngestEvent = serializer.unmarshal(&bytes).unwrap();
            assert_eq!(back, event);
        }
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        let err = Serializer::<IngestEvent>::unmarshal(
            &JsonSerializer,
            br#"{"type":"batch_created","value":{}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("event serialization:"));
    }
}
