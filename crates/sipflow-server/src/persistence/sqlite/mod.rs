//! SQLite implementation of the persistence [`Service`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::error_helpers::{classify, rollback};
use super::{
    decode_time, encode_time, Page, PersistenceError, Result, Service, SipFilter, Updater,
    UserFilter,
};
use crate::models::{Batch, Sip, Task, User, Workflow, MAX_NAME_LEN};

mod batch;
mod sip;
mod task;
mod user;
mod workflow;

/// Source of "now" for `created_at` columns.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

type Tx<'c> = Transaction<'c, Sqlite>;

#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
    clock: Clock,
}

impl fmt::Debug for SqlitePersistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlitePersistence")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl SqlitePersistence {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a pool with foreign keys enforced.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> std::result::Result<SqlitePool, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.foreign_keys(true);
        SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await
    }

    pub async fn migrate(pool: &SqlitePool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(pool).await
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

#[async_trait]
impl Service for SqlitePersistence {
    #[tracing::instrument(skip(self, sip), fields(sip = %sip.uuid))]
    async fn create_sip(&self, sip: Sip) -> Result<Sip> {
        sip::create(&self.pool, self.now(), sip).await
    }

    #[tracing::instrument(skip(self, updater))]
    async fn update_sip(&self, id: i64, updater: Updater<Sip>) -> Result<Sip> {
        sip::update(&self.pool, id, updater).await
    }

    async fn delete_sip(&self, id: i64) -> Result<()> {
        sip::delete(&self.pool, id).await
    }

    async fn read_sip(&self, uuid: Uuid) -> Result<Sip> {
        sip::read(&self.pool, uuid).await
    }

    async fn list_sips(&self, filter: &SipFilter) -> Result<(Vec<Sip>, Page)> {
        sip::list(&self.pool, filter).await
    }

    #[tracing::instrument(skip(self, workflow), fields(temporal_id = %workflow.temporal_id))]
    async fn create_workflow(&self, workflow: Workflow) -> Result<Workflow> {
        workflow::create(&self.pool, workflow).await
    }

    #[tracing::instrument(skip(self, updater))]
    async fn update_workflow(&self, id: i64, updater: Updater<Workflow>) -> Result<Workflow> {
        workflow::update(&self.pool, id, updater).await
    }

    async fn list_workflows(&self, sip_uuid: Uuid) -> Result<Vec<Workflow>> {
        workflow::list(&self.pool, sip_uuid).await
    }

    async fn create_task(&self, task: Task) -> Result<Task> {
        task::create(&self.pool, task).await
    }

    #[tracing::instrument(skip(self, tasks), fields(count = tasks.len()))]
    async fn create_tasks(&self, tasks: Vec<Task>) -> Result<Vec<Task>> {
        task::create_many(&self.pool, tasks).await
    }

    #[tracing::instrument(skip(self, updater))]
    async fn update_task(&self, id: i64, updater: Updater<Task>) -> Result<Task> {
        task::update(&self.pool, id, updater).await
    }

    async fn list_tasks(&self, workflow_id: i64) -> Result<Vec<Task>> {
        task::list(&self.pool, workflow_id).await
    }

    async fn create_user(&self, user: User) -> Result<User> {
        user::create(&self.pool, self.now(), user).await
    }

    async fn read_user(&self, uuid: Uuid) -> Result<User> {
        user::read(&self.pool, uuid).await
    }

    async fn read_oidc_user(&self, iss: &str, sub: &str) -> Result<User> {
        user::read_oidc(&self.pool, iss, sub).await
    }

    async fn list_users(&self, filter: &UserFilter) -> Result<(Vec<User>, Page)> {
        user::list(&self.pool, filter).await
    }

    async fn create_batch(&self, batch: Batch) -> Result<Batch> {
        batch::create(&self.pool, self.now(), batch).await
    }

    async fn read_batch(&self, uuid: Uuid) -> Result<Batch> {
        batch::read(&self.pool, uuid).await
    }

    async fn delete_batch(&self, id: i64) -> Result<()> {
        batch::delete(&self.pool, id).await
    }
}

async fn begin(pool: &SqlitePool, context: &str) -> Result<Tx<'static>> {
    pool.begin().await.map_err(|e| classify(e, context))
}

/// Commit on success, roll back on error.
async fn finish<T>(tx: Tx<'_>, result: Result<T>, context: &str) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await.map_err(|e| classify(e, context))?;
            Ok(value)
        },
        Err(err) => Err(rollback(tx, err).await),
    }
}

fn validate_name(context: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PersistenceError::not_valid(format!("{context}: name must not be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(PersistenceError::not_valid(format!(
            "{context}: name exceeds maximum length of {MAX_NAME_LEN}"
        )));
    }
    Ok(())
}

fn validate_started_completed(
    context: &str,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
) -> Result<()> {
    match (started_at, completed_at) {
        (Some(started), Some(completed)) if completed < started => Err(
            PersistenceError::not_valid(format!("{context}: completed_at is before started_at")),
        ),
        _ => Ok(()),
    }
}

fn updater_error(context: &str, err: anyhow::Error) -> PersistenceError {
    PersistenceError::not_valid(format!("{context}: updater error: {err:#}"))
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| PersistenceError::internal(format!("decode UUID {value:?}: {e}")))
}

fn parse_opt_uuid(value: Option<String>) -> Result<Option<Uuid>> {
    value.as_deref().map(parse_uuid).transpose()
}

fn parse_opt_time(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(decode_time).transpose()
}

fn parse_enum<T>(value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e: T::Err| PersistenceError::internal(format!("decode enum: {e}")))
}

fn opt_time(value: &Option<DateTime<Utc>>) -> Option<String> {
    value.as_ref().map(encode_time)
}

fn opt_uuid(value: &Option<Uuid>) -> Option<String> {
    value.as_ref().map(Uuid::to_string)
}
