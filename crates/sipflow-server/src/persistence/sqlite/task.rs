use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

use super::{
    begin, classify, finish, opt_time, parse_enum, parse_opt_time, parse_uuid, updater_error,
    validate_name, validate_started_completed, Tx,
};
use crate::models::{Task, TaskStatus};
use crate::persistence::chunk::{chunk, DEFAULT_BATCH_SIZE};
use crate::persistence::{PersistenceError, Result, Updater};

const SELECT: &str = "SELECT tasks.id, tasks.uuid, tasks.name, tasks.status, tasks.started_at, \
     tasks.completed_at, tasks.note, tasks.workflow_id, workflows.uuid AS workflow_uuid \
     FROM tasks JOIN workflows ON workflows.id = tasks.workflow_id";

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    uuid: String,
    name: String,
    status: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    note: String,
    workflow_id: i64,
    workflow_uuid: String,
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: self.id,
            uuid: parse_uuid(&self.uuid)?,
            name: self.name,
            status: parse_enum(&self.status)?,
            started_at: parse_opt_time(self.started_at)?,
            completed_at: parse_opt_time(self.completed_at)?,
            note: self.note,
            workflow_id: self.workflow_id,
            workflow_uuid: parse_uuid(&self.workflow_uuid)?,
        })
    }
}

fn validate(context: &str, task: &Task) -> Result<()> {
    if task.uuid.is_nil() {
        return Err(PersistenceError::required_field("UUID"));
    }
    if task.name.is_empty() {
        return Err(PersistenceError::required_field("Name"));
    }
    if task.workflow_uuid.is_nil() && task.workflow_id <= 0 {
        return Err(PersistenceError::required_field("WorkflowUUID"));
    }
    validate_name(context, &task.name)?;
    validate_started_completed(context, task.started_at, task.completed_at)
}

/// Resolve the parent workflow as `(id, uuid)`, memoizing UUID lookups.
async fn resolve_workflow(
    tx: &mut Tx<'_>,
    context: &str,
    task: &Task,
    cache: &mut HashMap<Uuid, i64>,
) -> Result<(i64, Uuid)> {
    if !task.workflow_uuid.is_nil() {
        if let Some(id) = cache.get(&task.workflow_uuid) {
            return Ok((*id, task.workflow_uuid));
        }
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM workflows WHERE uuid = ?")
            .bind(task.workflow_uuid.to_string())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| classify(e, context))?;
        let id = id.ok_or_else(|| {
            PersistenceError::not_found(format!(
                "{context}: workflow {} not found",
                task.workflow_uuid
            ))
        })?;
        cache.insert(task.workflow_uuid, id);
        return Ok((id, task.workflow_uuid));
    }

    let uuid: Option<String> = sqlx::query_scalar("SELECT uuid FROM workflows WHERE id = ?")
        .bind(task.workflow_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| classify(e, context))?;
    let uuid = uuid.ok_or_else(|| {
        PersistenceError::not_found(format!("{context}: workflow {} not found", task.workflow_id))
    })?;
    let uuid = parse_uuid(&uuid)?;
    cache.insert(uuid, task.workflow_id);
    Ok((task.workflow_id, uuid))
}

pub(super) async fn create(pool: &SqlitePool, task: Task) -> Result<Task> {
    const CONTEXT: &str = "create task";
    validate(CONTEXT, &task)?;
    let mut tx = begin(pool, CONTEXT).await?;
    let result = insert_chunked(&mut tx, CONTEXT, vec![task]).await;
    let mut tasks = finish(tx, result, CONTEXT).await?;
    tasks
        .pop()
        .ok_or_else(|| PersistenceError::internal(format!("{CONTEXT}: no row returned")))
}

pub(super) async fn create_many(pool: &SqlitePool, tasks: Vec<Task>) -> Result<Vec<Task>> {
    const CONTEXT: &str = "create tasks";
    if tasks.is_empty() {
        return Ok(Vec::new());
    }
    for task in &tasks {
        validate(CONTEXT, task)?;
    }
    let mut tx = begin(pool, CONTEXT).await?;
    let result = insert_chunked(&mut tx, CONTEXT, tasks).await;
    finish(tx, result, CONTEXT).await
}

async fn insert_chunked(tx: &mut Tx<'_>, context: &str, tasks: Vec<Task>) -> Result<Vec<Task>> {
    let mut cache = HashMap::new();
    let mut created = Vec::with_capacity(tasks.len());

    for batch in chunk(tasks, DEFAULT_BATCH_SIZE) {
        let mut rows = Vec::with_capacity(batch.len());
        for mut task in batch {
            let (workflow_id, workflow_uuid) =
                resolve_workflow(tx, context, &task, &mut cache).await?;
            task.workflow_id = workflow_id;
            task.workflow_uuid = workflow_uuid;
            rows.push(task);
        }

        let mut qb: QueryBuilder<'static, Sqlite> = QueryBuilder::new(
            "INSERT INTO tasks (uuid, name, status, started_at, completed_at, note, workflow_id) ",
        );
        qb.push_values(rows.iter(), |mut b, task| {
            b.push_bind(task.uuid.to_string())
                .push_bind(task.name.clone())
                .push_bind(task.status.as_str())
                .push_bind(opt_time(&task.started_at))
                .push_bind(opt_time(&task.completed_at))
                .push_bind(task.note.clone())
                .push_bind(task.workflow_id);
        });
        qb.push(" RETURNING id, uuid");

        let ids: HashMap<String, i64> = qb
            .build_query_as::<(i64, String)>()
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| classify(e, context))?
            .into_iter()
            .map(|(id, uuid)| (uuid, id))
            .collect();

        for mut task in rows {
            task.id = *ids.get(&task.uuid.to_string()).ok_or_else(|| {
                PersistenceError::internal(format!("{context}: missing id for task {}", task.uuid))
            })?;
            created.push(task);
        }
    }

    Ok(created)
}

pub(super) async fn update(pool: &SqlitePool, id: i64, updater: Updater<Task>) -> Result<Task> {
    const CONTEXT: &str = "update task";
    let mut tx = begin(pool, CONTEXT).await?;
    let result = update_in(&mut tx, id, updater).await;
    finish(tx, result, CONTEXT).await
}

async fn update_in(tx: &mut Tx<'_>, id: i64, updater: Updater<Task>) -> Result<Task> {
    const CONTEXT: &str = "update task";

    let current = sqlx::query_as::<_, TaskRow>(&format!("{SELECT} WHERE tasks.id = ?"))
        .bind(id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| classify(e, CONTEXT))?
        .into_task()?;

    let updated = updater(current.clone()).map_err(|e| updater_error(CONTEXT, e))?;
    validate_name(CONTEXT, &updated.name)?;
    validate_started_completed(CONTEXT, updated.started_at, updated.completed_at)?;

    let mut next = current;
    next.name = updated.name;
    if updated.status != TaskStatus::Unspecified {
        next.status = updated.status;
    }
    next.started_at = updated.started_at;
    next.completed_at = updated.completed_at;
    next.note = updated.note;

    sqlx::query(
        "UPDATE tasks SET name = ?, status = ?, started_at = ?, completed_at = ?, note = ? \
         WHERE id = ?",
    )
    .bind(next.name.clone())
    .bind(next.status.as_str())
    .bind(opt_time(&next.started_at))
    .bind(opt_time(&next.completed_at))
    .bind(next.note.clone())
    .bind(id)
    .execute(&mut **tx)
    .await
    .map_err(|e| classify(e, CONTEXT))?;

    Ok(next)
}

pub(super) async fn list(pool: &SqlitePool, workflow_id: i64) -> Result<Vec<Task>> {
    sqlx::query_as::<_, TaskRow>(&format!(
        "{SELECT} WHERE tasks.workflow_id = ? ORDER BY tasks.id"
    ))
    .bind(workflow_id)
    .fetch_all(pool)
    .await
    .map_err(|e| classify(e, "list tasks"))?
    .into_iter()
    .map(TaskRow::into_task)
    .collect()
}
