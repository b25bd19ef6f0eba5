use sqlx::SqlitePool;
use uuid::Uuid;

use super::{
    begin, classify, finish, opt_time, parse_enum, parse_opt_time, parse_uuid, updater_error,
    validate_started_completed, Tx,
};
use crate::models::{Workflow, WorkflowStatus};
use crate::persistence::{PersistenceError, Result, Updater};

const SELECT: &str = "SELECT workflows.id, workflows.uuid, workflows.temporal_id, \
     workflows.type AS workflow_type, workflows.status, workflows.started_at, \
     workflows.completed_at, sips.uuid AS sip_uuid \
     FROM workflows JOIN sips ON sips.id = workflows.sip_id";

#[derive(sqlx::FromRow)]
struct WorkflowRow {
    id: i64,
    uuid: String,
    temporal_id: String,
    workflow_type: String,
    status: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    sip_uuid: String,
}

impl WorkflowRow {
    fn into_workflow(self) -> Result<Workflow> {
        Ok(Workflow {
            id: self.id,
            uuid: parse_uuid(&self.uuid)?,
            temporal_id: self.temporal_id,
            workflow_type: parse_enum(&self.workflow_type)?,
            status: parse_enum(&self.status)?,
            started_at: parse_opt_time(self.started_at)?,
            completed_at: parse_opt_time(self.completed_at)?,
            sip_uuid: parse_uuid(&self.sip_uuid)?,
        })
    }
}

pub(super) async fn create(pool: &SqlitePool, mut workflow: Workflow) -> Result<Workflow> {
    const CONTEXT: &str = "create workflow";
    if workflow.uuid.is_nil() {
        return Err(PersistenceError::required_field("UUID"));
    }
    if workflow.temporal_id.is_empty() {
        return Err(PersistenceError::required_field("TemporalID"));
    }
    if workflow.sip_uuid.is_nil() {
        return Err(PersistenceError::required_field("SIPUUID"));
    }
    validate_started_completed(CONTEXT, workflow.started_at, workflow.completed_at)?;

    let id: Option<i64> = sqlx::query_scalar(
        "INSERT INTO workflows (uuid, temporal_id, type, status, started_at, completed_at, sip_id) \
         SELECT ?, ?, ?, ?, ?, ?, sips.id FROM sips WHERE sips.uuid = ? RETURNING id",
    )
    .bind(workflow.uuid.to_string())
    .bind(workflow.temporal_id.clone())
    .bind(workflow.workflow_type.as_str())
    .bind(workflow.status.as_str())
    .bind(opt_time(&workflow.started_at))
    .bind(opt_time(&workflow.completed_at))
    .bind(workflow.sip_uuid.to_string())
    .fetch_optional(pool)
    .await
    .map_err(|e| classify(e, CONTEXT))?;

    workflow.id = id.ok_or_else(|| {
        PersistenceError::not_found(format!("{CONTEXT}: SIP {} not found", workflow.sip_uuid))
    })?;
    Ok(workflow)
}

pub(super) async fn update(
    pool: &SqlitePool,
    id: i64,
    updater: Updater<Workflow>,
) -> Result<Workflow> {
    const CONTEXT: &str = "update workflow";
    let mut tx = begin(pool, CONTEXT).await?;
    let result = update_in(&mut tx, id, updater).await;
    finish(tx, result, CONTEXT).await
}

async fn update_in(tx: &mut Tx<'_>, id: i64, updater: Updater<Workflow>) -> Result<Workflow> {
    const CONTEXT: &str = "update workflow";

    let current = sqlx::query_as::<_, WorkflowRow>(&format!("{SELECT} WHERE workflows.id = ?"))
        .bind(id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| classify(e, CONTEXT))?
        .into_workflow()?;

    let updated = updater(current.clone()).map_err(|e| updater_error(CONTEXT, e))?;
    validate_started_completed(CONTEXT, updated.started_at, updated.completed_at)?;

    let mut next = current;
    if updated.status != WorkflowStatus::Unspecified {
        next.status = updated.status;
    }
    next.started_at = updated.started_at;
    next.completed_at = updated.completed_at;

    sqlx::query("UPDATE workflows SET status = ?, started_at = ?, completed_at = ? WHERE id = ?")
        .bind(next.status.as_str())
        .bind(opt_time(&next.started_at))
        .bind(opt_time(&next.completed_at))
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(|e| classify(e, CONTEXT))?;

    Ok(next)
}

pub(super) async fn list(pool: &SqlitePool, sip_uuid: Uuid) -> Result<Vec<Workflow>> {
    sqlx::query_as::<_, WorkflowRow>(&format!(
        "{SELECT} WHERE sips.uuid = ? ORDER BY workflows.started_at DESC, workflows.id DESC"
    ))
    .bind(sip_uuid.to_string())
    .fetch_all(pool)
    .await
    .map_err(|e| classify(e, "list workflows"))?
    .into_iter()
    .map(WorkflowRow::into_workflow)
    .collect()
}
