//! Domain records
//!
//! Value types shared by persistence, the ingest coordinator and the event
//! stream. They carry no storage or transport concerns; relationships are
//! expressed by identifier only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod enums;

pub use enums::{
    BatchStatus, FailedAs, ParseEnumError, SipStatus, TaskStatus, WorkflowStatus, WorkflowType,
};

/// Maximum byte length of SIP and task names.
pub const MAX_NAME_LEN: usize = 2048;

/// Submission Information Package
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Sip {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub aip_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub status: SipStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_as: Option<FailedAs>,
    pub failed_key: Option<String>,
    pub uploader: Option<User>,
}

impl Sip {
    pub fn new(uuid: Uuid, name: impl Into<String>, status: SipStatus) -> Self {
        Self {
            uuid,
            name: name.into(),
            status,
            ..Default::default()
        }
    }
}

/// Workflow execution started on the external engine for a SIP
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Workflow {
    pub id: i64,
    pub uuid: Uuid,
    pub temporal_id: String,
    #[serde(rename = "type")]
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub sip_uuid: Uuid,
}

/// Unit of work recorded inside a workflow execution
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub note: String,
    pub workflow_id: i64,
    /// Parent workflow reference used on creation; resolved to `workflow_id`.
    pub workflow_uuid: Uuid,
}

/// Operator account, optionally bound to an OIDC identity
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub uuid: Uuid,
    pub email: Option<String>,
    pub name: Option<String>,
    pub oidc_iss: Option<String>,
    pub oidc_sub: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Both halves of the OIDC identity, when present and non-empty.
    pub fn oidc_identity(&self) -> Option<(&str, &str)> {
        match (self.oidc_iss.as_deref(), self.oidc_sub.as_deref()) {
            (Some(iss), Some(sub)) if !iss.is_empty() && !sub.is_empty() => Some((iss, sub)),
            _ => None,
        }
    }
}

/// Group of SIPs submitted together
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Batch {
    pub id: i64,
    pub uuid: Uuid,
    pub identifier: String,
    pub status: BatchStatus,
    pub sips_count: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub uploader: Option<User>,
}

/// Workflow together with the tasks recorded for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowWithTasks {
    #[serde(flatten)]
    pub workflow: Workflow,
    pub tasks: Vec<Task>,
}
