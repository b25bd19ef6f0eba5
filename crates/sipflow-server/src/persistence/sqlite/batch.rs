use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::user::{self, JoinedUser};
use super::{
    begin, classify, decode_time, encode_time, finish, opt_time, parse_enum, parse_opt_time,
    parse_uuid, validate_started_completed, Tx,
};
use crate::models::Batch;
use crate::persistence::{PersistenceError, Result};

const SELECT: &str = "SELECT batches.id, batches.uuid, batches.identifier, batches.status, \
     batches.sips_count, batches.created_at, batches.started_at, batches.completed_at, \
     users.id AS uploader_id, users.uuid AS uploader_uuid, users.email AS uploader_email, \
     users.name AS uploader_name, users.oidc_iss AS uploader_oidc_iss, \
     users.oidc_sub AS uploader_oidc_sub, users.created_at AS uploader_created_at \
     FROM batches LEFT JOIN users ON users.id = batches.uploader_id";

#[derive(sqlx::FromRow)]
struct BatchRow {
    id: i64,
    uuid: String,
    identifier: String,
    status: String,
    sips_count: i64,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    uploader_id: Option<i64>,
    uploader_uuid: Option<String>,
    uploader_email: Option<String>,
    uploader_name: Option<String>,
    uploader_oidc_iss: Option<String>,
    uploader_oidc_sub: Option<String>,
    uploader_created_at: Option<String>,
}

impl BatchRow {
    fn into_batch(self) -> Result<Batch> {
        let uploader = JoinedUser {
            id: self.uploader_id,
            uuid: self.uploader_uuid,
            email: self.uploader_email,
            name: self.uploader_name,
            oidc_iss: self.uploader_oidc_iss,
            oidc_sub: self.uploader_oidc_sub,
            created_at: self.uploader_created_at,
        }
        .into_user()?;

        Ok(Batch {
            id: self.id,
            uuid: parse_uuid(&self.uuid)?,
            identifier: self.identifier,
            status: parse_enum(&self.status)?,
            sips_count: self.sips_count,
            created_at: decode_time(&self.created_at)?,
            started_at: parse_opt_time(self.started_at)?,
            completed_at: parse_opt_time(self.completed_at)?,
            uploader,
        })
    }
}

pub(super) async fn create(pool: &SqlitePool, now: DateTime<Utc>, batch: Batch) -> Result<Batch> {
    const CONTEXT: &str = "create batch";
    if batch.uuid.is_nil() {
        return Err(PersistenceError::required_field("UUID"));
    }
    if batch.identifier.is_empty() {
        return Err(PersistenceError::required_field("Identifier"));
    }
    validate_started_completed(CONTEXT, batch.started_at, batch.completed_at)?;

    let mut tx = begin(pool, CONTEXT).await?;
    let result = insert(&mut tx, now, batch).await;
    finish(tx, result, CONTEXT).await
}

async fn insert(tx: &mut Tx<'_>, now: DateTime<Utc>, mut batch: Batch) -> Result<Batch> {
    batch.uploader = match batch.uploader.take() {
        Some(uploader) => Some(user::find_or_create(tx, now, uploader).await?),
        None => None,
    };
    batch.created_at = now;
    batch.id = sqlx::query_scalar(
        "INSERT INTO batches (uuid, identifier, status, sips_count, created_at, started_at, \
         completed_at, uploader_id) VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(batch.uuid.to_string())
    .bind(batch.identifier.clone())
    .bind(batch.status.as_str())
    .bind(batch.sips_count)
    .bind(encode_time(&batch.created_at))
    .bind(opt_time(&batch.started_at))
    .bind(opt_time(&batch.completed_at))
    .bind(batch.uploader.as_ref().map(|u| u.id))
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| classify(e, "create batch"))?;
    Ok(batch)
}

pub(super) async fn read(pool: &SqlitePool, uuid: Uuid) -> Result<Batch> {
    sqlx::query_as::<_, BatchRow>(&format!("{SELECT} WHERE batches.uuid = ?"))
        .bind(uuid.to_string())
        .fetch_one(pool)
        .await
        .map_err(|e| classify(e, "read batch"))?
        .into_batch()
}

pub(super) async fn delete(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM batches WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| classify(e, "delete batch"))?;
    if result.rows_affected() == 0 {
        return Err(PersistenceError::not_found("delete batch: not found"));
    }
    Ok(())
}
