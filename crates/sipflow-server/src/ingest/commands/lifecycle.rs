//! Progress reported by the processing workflow
//!
//! Each write publishes the matching event once it has committed. Failed
//! writes publish nothing.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::event::IngestEvent;
use crate::ingest::{IngestError, IngestService, Result};
use crate::models::{FailedAs, Sip, SipStatus, Task, TaskStatus, Workflow, WorkflowStatus};
use crate::persistence::Updater;

impl IngestService {
    async fn update_sip(&self, uuid: Uuid, updater: Updater<Sip>) -> Result<Sip> {
        let current = self.persistence.read_sip(uuid).await.map_err(|e| {
            if e.is_not_found() {
                IngestError::sip_not_found(uuid)
            } else {
                IngestError::from_read(e, "read SIP")
            }
        })?;
        self.persistence
            .update_sip(current.id, updater)
            .await
            .map_err(|e| IngestError::from_write(e, "update SIP"))
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_sip_status(&self, uuid: Uuid, status: SipStatus) -> Result<Sip> {
        let sip = self
            .update_sip(
                uuid,
                Box::new(move |mut sip: Sip| -> anyhow::Result<Sip> {
                    sip.status = status;
                    Ok(sip)
                }),
            )
            .await?;
        self.publish(IngestEvent::sip_status_updated(sip.uuid, sip.status));
        Ok(sip)
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_sip_in_progress(&self, uuid: Uuid, started_at: DateTime<Utc>) -> Result<Sip> {
        let sip = self
            .update_sip(
                uuid,
                Box::new(move |mut sip: Sip| -> anyhow::Result<Sip> {
                    sip.status = SipStatus::Processing;
                    sip.started_at = Some(started_at);
                    Ok(sip)
                }),
            )
            .await?;
        self.publish(IngestEvent::sip_updated(sip.clone()));
        Ok(sip)
    }

    /// Record the outcome of processing, with the AIP produced if any.
    #[tracing::instrument(skip(self))]
    pub async fn set_sip_completed(
        &self,
        uuid: Uuid,
        status: SipStatus,
        aip_id: Option<Uuid>,
        completed_at: DateTime<Utc>,
    ) -> Result<Sip> {
        let sip = self
            .update_sip(
                uuid,
                Box::new(move |mut sip: Sip| -> anyhow::Result<Sip> {
                    sip.status = status;
                    if aip_id.is_some() {
                        sip.aip_id = aip_id;
                    }
                    sip.completed_at = Some(completed_at);
                    Ok(sip)
                }),
            )
            .await?;
        self.publish(IngestEvent::sip_updated(sip.clone()));
        Ok(sip)
    }

    /// Record where the failed SIP or PIP was kept in the internal bucket.
    #[tracing::instrument(skip(self))]
    pub async fn set_sip_failed(&self, uuid: Uuid, failed_as: FailedAs, key: String) -> Result<Sip> {
        if key.is_empty() {
            return Err(IngestError::not_valid("missing failed key"));
        }
        let sip = self
            .update_sip(
                uuid,
                Box::new(move |mut sip: Sip| -> anyhow::Result<Sip> {
                    sip.failed_as = Some(failed_as);
                    sip.failed_key = Some(key);
                    Ok(sip)
                }),
            )
            .await?;
        self.publish(IngestEvent::sip_updated(sip.clone()));
        Ok(sip)
    }

    #[tracing::instrument(skip(self, workflow), fields(temporal_id = %workflow.temporal_id))]
    pub async fn create_workflow(&self, workflow: Workflow) -> Result<Workflow> {
        let workflow = self
            .persistence
            .create_workflow(workflow)
            .await
            .map_err(|e| IngestError::from_write(e, "create workflow"))?;
        self.publish(IngestEvent::workflow_created(workflow.clone()));
        Ok(workflow)
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_workflow_status(&self, id: i64, status: WorkflowStatus) -> Result<Workflow> {
        self.update_workflow(
            id,
            Box::new(move |mut workflow: Workflow| -> anyhow::Result<Workflow> {
                workflow.status = status;
                Ok(workflow)
            }),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn complete_workflow(
        &self,
        id: i64,
        status: WorkflowStatus,
        completed_at: DateTime<Utc>,
    ) -> Result<Workflow> {
        self.update_workflow(
            id,
            Box::new(move |mut workflow: Workflow| -> anyhow::Result<Workflow> {
                workflow.status = status;
                workflow.completed_at = Some(completed_at);
                Ok(workflow)
            }),
        )
        .await
    }

    async fn update_workflow(&self, id: i64, updater: Updater<Workflow>) -> Result<Workflow> {
        let workflow = self
            .persistence
            .update_workflow(id, updater)
            .await
            .map_err(|e| IngestError::from_write(e, "update workflow"))?;
        self.publish(IngestEvent::workflow_updated(workflow.clone()));
        Ok(workflow)
    }

    #[tracing::instrument(skip(self, task), fields(task = %task.uuid))]
    pub async fn create_task(&self, task: Task) -> Result<Task> {
        let task = self
            .persistence
            .create_task(task)
            .await
            .map_err(|e| IngestError::from_write(e, "create task"))?;
        self.publish(IngestEvent::task_created(task.clone()));
        Ok(task)
    }

    /// Create every task in one transaction, then publish one event per task.
    #[tracing::instrument(skip(self, tasks), fields(count = tasks.len()))]
    pub async fn create_tasks(&self, tasks: Vec<Task>) -> Result<Vec<Task>> {
        let tasks = self
            .persistence
            .create_tasks(tasks)
            .await
            .map_err(|e| IngestError::from_write(e, "create tasks"))?;
        for task in &tasks {
            self.publish(IngestEvent::task_created(task.clone()));
        }
        Ok(tasks)
    }

    #[tracing::instrument(skip(self, note))]
    pub async fn complete_task(
        &self,
        id: i64,
        status: TaskStatus,
        completed_at: DateTime<Utc>,
        note: Option<String>,
    ) -> Result<Task> {
        let task = self
            .persistence
            .update_task(
                id,
                Box::new(move |mut task: Task| -> anyhow::Result<Task> {
                    task.status = status;
                    task.completed_at = Some(completed_at);
                    if let Some(note) = note {
                        task.note = note;
                    }
                    Ok(task)
                }),
            )
            .await
            .map_err(|e| IngestError::from_write(e, "update task"))?;
        self.publish(IngestEvent::task_updated(task.clone()));
        Ok(task)
    }
}
