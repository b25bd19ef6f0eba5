//! Ingest event union

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Sip, SipStatus, Task, Workflow};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PingEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SipCreatedEvent {
    pub uuid: Uuid,
    pub item: Sip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SipUpdatedEvent {
    pub uuid: Uuid,
    pub item: Sip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SipStatusUpdatedEvent {
    pub uuid: Uuid,
    pub status: SipStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SipWorkflowCreatedEvent {
    pub uuid: Uuid,
    pub item: Workflow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SipWorkflowUpdatedEvent {
    pub uuid: Uuid,
    pub item: Workflow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SipTaskCreatedEvent {
    pub uuid: Uuid,
    pub item: Task,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SipTaskUpdatedEvent {
    pub uuid: Uuid,
    pub item: Task,
}

/// Envelope published on the ingest event bus and streamed to monitors.
///
/// Encoded as `{"type": "<variant>", "value": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum IngestEvent {
    Ping(PingEvent),
    SipCreated(SipCreatedEvent),
    SipUpdated(SipUpdatedEvent),
    SipStatusUpdated(SipStatusUpdatedEvent),
    SipWorkflowCreated(SipWorkflowCreatedEvent),
    SipWorkflowUpdated(SipWorkflowUpdatedEvent),
    SipTaskCreated(SipTaskCreatedEvent),
    SipTaskUpdated(SipTaskUpdatedEvent),
}

impl IngestEvent {
    pub fn ping(message: impl Into<String>) -> Self {
        IngestEvent::Ping(PingEvent {
            message: Some(message.into()),
        })
    }

    pub fn sip_created(sip: Sip) -> Self {
        IngestEvent::SipCreated(SipCreatedEvent {
            uuid: sip.uuid,
            item: sip,
        })
    }

    pub fn sip_updated(sip: Sip) -> Self {
        IngestEvent::SipUpdated(SipUpdatedEvent {
            uuid: sip.uuid,
            item: sip,
        })
    }

    pub fn sip_status_updated(uuid: Uuid, status: SipStatus) -> Self {
        IngestEvent::SipStatusUpdated(SipStatusUpdatedEvent { uuid, status })
    }

    pub fn workflow_created(workflow: Workflow) -> Self {
        IngestEvent::SipWorkflowCreated(SipWorkflowCreatedEvent {
            uuid: workflow.uuid,
            item: workflow,
        })
    }

    pub fn workflow_updated(workflow: Workflow) -> Self {
        IngestEvent::SipWorkflowUpdated(SipWorkflowUpdatedEvent {
            uuid: workflow.uuid,
            item: workflow,
        })
    }

    pub fn task_created(task: Task) -> Self {
        IngestEvent::SipTaskCreated(SipTaskCreatedEvent {
            uuid: task.uuid,
            item: task,
        })
    }

    pub fn task_updated(task: Task) -> Self {
        IngestEvent::SipTaskUpdated(SipTaskUpdatedEvent {
            uuid: task.uuid,
            item: task,
        })
    }

    /// Wire tag of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestEvent::Ping(_) => "ping",
            IngestEvent::SipCreated(_) => "sip_created",
            IngestEvent::SipUpdated(_) => "sip_updated",
            IngestEvent::SipStatusUpdated(_) => "sip_status_updated",
            IngestEvent::SipWorkflowCreated(_) => "sip_workflow_created",
            IngestEvent::SipWorkflowUpdated(_) => "sip_workflow_updated",
            IngestEvent::SipTaskCreated(_) => "sip_task_created",
            IngestEvent::SipTaskUpdated(_) => "sip_task_updated",
        }
    }
}
