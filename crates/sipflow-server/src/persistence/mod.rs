//! Persistence service
//!
//! Transactional create/read/update/list over the domain records. Every
//! storage error is classified once, at this boundary, into one of four
//! [`ErrorKind`]s; callers match on the kind only.
//!
//! Updates run through caller-provided [`Updater`] closures applied inside
//! the transaction to a fresh copy of the current row. Only a per-entity
//! whitelist of fields is copied back from the updater's output.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Batch, Sip, SipStatus, Task, User, Workflow};
use crate::timerange::Range;

pub mod chunk;
pub mod error_helpers;
pub mod filter;
pub mod sqlite;

pub use filter::{Filter, Sort, SortColumn, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use sqlite::SqlitePersistence;

/// Sentinel error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    NotValid,
    Internal,
    /// Invalid argument, e.g. a missing required field.
    Invalid,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::NotFound => "not found error",
            ErrorKind::NotValid => "invalid data error",
            ErrorKind::Internal => "internal error",
            ErrorKind::Invalid => "invalid argument",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct PersistenceError {
    kind: ErrorKind,
    message: String,
}

impl PersistenceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn not_valid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotValid, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, message)
    }

    pub fn required_field(field: &str) -> Self {
        Self::invalid(format!("missing required field: {field}"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

pub type Result<T, E = PersistenceError> = std::result::Result<T, E>;

/// Mutation applied to a fresh copy of a row inside the update transaction.
pub type Updater<T> = Box<dyn FnOnce(T) -> anyhow::Result<T> + Send>;

/// Page metadata returned by list operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SipFilter {
    pub name: Option<String>,
    pub aip_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub status: Option<SipStatus>,
    pub created_at: Option<Range>,
    pub uploader_id: Option<Uuid>,
    pub sort: Sort,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserFilter {
    pub email: Option<String>,
    pub name: Option<String>,
    pub sort: Sort,
    pub limit: i64,
    pub offset: i64,
}

#[async_trait]
pub trait Service: Send + Sync {
    /// Persist a new SIP, linking (and creating if needed) its uploader.
    async fn create_sip(&self, sip: Sip) -> Result<Sip>;

    /// Whitelisted fields: name, status, aip_id, started_at, completed_at,
    /// failed_as and failed_key.
    async fn update_sip(&self, id: i64, updater: Updater<Sip>) -> Result<Sip>;

    async fn delete_sip(&self, id: i64) -> Result<()>;

    async fn read_sip(&self, uuid: Uuid) -> Result<Sip>;

    async fn list_sips(&self, filter: &SipFilter) -> Result<(Vec<Sip>, Page)>;

    async fn create_workflow(&self, workflow: Workflow) -> Result<Workflow>;

    /// Whitelisted fields: status, started_at and completed_at.
    async fn update_workflow(&self, id: i64, updater: Updater<Workflow>) -> Result<Workflow>;

    /// Workflows of a SIP, most recently started first.
    async fn list_workflows(&self, sip_uuid: Uuid) -> Result<Vec<Workflow>>;

    async fn create_task(&self, task: Task) -> Result<Task>;

    /// Insert every task in one transaction, chunked to bound statement size.
    async fn create_tasks(&self, tasks: Vec<Task>) -> Result<Vec<Task>>;

    /// Whitelisted fields: name, status, started_at, completed_at and note.
    async fn update_task(&self, id: i64, updater: Updater<Task>) -> Result<Task>;

    async fn list_tasks(&self, workflow_id: i64) -> Result<Vec<Task>>;

    async fn create_user(&self, user: User) -> Result<User>;

    async fn read_user(&self, uuid: Uuid) -> Result<User>;

    async fn read_oidc_user(&self, iss: &str, sub: &str) -> Result<User>;

    async fn list_users(&self, filter: &UserFilter) -> Result<(Vec<User>, Page)>;

    async fn create_batch(&self, batch: Batch) -> Result<Batch>;

    async fn read_batch(&self, uuid: Uuid) -> Result<Batch>;

    async fn delete_batch(&self, id: i64) -> Result<()>;
}

/// Fixed-width UTC encoding so stored timestamps compare lexically.
pub(crate) fn encode_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decode_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PersistenceError::internal(format!("decode timestamp {value:?}: {e}")))
}
