//! Workflow engine adapter
//!
//! The ingest core only starts workflows and signals them; scheduling,
//! retries and timers belong to the engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::WorkflowType;

pub mod temporal;

pub use temporal::TemporalEngine;

pub const PROCESSING_WORKFLOW_NAME: &str = "processing-workflow";
pub const REVIEW_PERFORMED_SIGNAL: &str = "review-performed-signal";

/// Wall-clock limit on starting a workflow, independent of the caller.
pub const START_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("workflow engine returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("workflow engine request failed: {0}")]
    Transport(String),

    #[error("workflow engine request timed out")]
    Timeout,

    #[error("encode workflow payload: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Encode(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ReusePolicy {
    #[default]
    #[serde(rename = "WORKFLOW_ID_REUSE_POLICY_ALLOW_DUPLICATE")]
    AllowDuplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartWorkflowOptions {
    pub id: String,
    pub task_queue: String,
    pub reuse_policy: ReusePolicy,
}

#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn start_workflow(
        &self,
        options: &StartWorkflowOptions,
        name: &str,
        input: serde_json::Value,
    ) -> Result<(), EngineError>;

    async fn signal_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
        signal: &str,
        payload: serde_json::Value,
    ) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingWorkflowRequest {
    pub sip_uuid: Uuid,
    pub sip_name: String,
    #[serde(rename = "type")]
    pub workflow_type: WorkflowType,
    pub key: String,
    pub sip_source_id: Option<Uuid>,
    /// Negative retains the source object forever.
    pub retention_period_secs: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPerformedSignal {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<Uuid>,
}

pub fn processing_workflow_id(sip_uuid: Uuid) -> String {
    format!("{PROCESSING_WORKFLOW_NAME}-{sip_uuid}")
}

async fn start_with_timeout(
    engine: &dyn WorkflowEngine,
    options: StartWorkflowOptions,
    name: &str,
    input: serde_json::Value,
) -> Result<(), EngineError> {
    tokio::time::timeout(START_TIMEOUT, engine.start_workflow(&options, name, input))
        .await
        .map_err(|_| EngineError::Timeout)?
}

/// Start the processing workflow for a SIP.
pub async fn init_processing_workflow(
    engine: &dyn WorkflowEngine,
    task_queue: &str,
    req: &ProcessingWorkflowRequest,
) -> Result<(), EngineError> {
    let options = StartWorkflowOptions {
        id: processing_workflow_id(req.sip_uuid),
        task_queue: task_queue.to_string(),
        reuse_policy: ReusePolicy::AllowDuplicate,
    };
    start_with_timeout(
        engine,
        options,
        PROCESSING_WORKFLOW_NAME,
        serde_json::to_value(req)?,
    )
    .await
}
