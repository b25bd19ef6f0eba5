//! Classification of database errors into persistence sentinels
//!
//! Every sqlx error crossing the persistence boundary goes through
//! [`classify`] exactly once.
//!
//! ```rust,ignore
//! sqlx::query("DELETE FROM sips WHERE id = ?")
//!     .bind(id)
//!     .execute(&pool)
//!     .await
//!     .map_err(|e| classify(e, "delete SIP"))?;
//! ```

use sqlx::error::ErrorKind as DbErrorKind;
use sqlx::{Error as SqlxError, Sqlite, Transaction};

use super::PersistenceError;

/// Kind of constraint a database error violated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintViolation {
    Unique,
    ForeignKey,
    NotNull,
    Check,
}

pub fn constraint_violation(error: &SqlxError) -> Option<ConstraintViolation> {
    let SqlxError::Database(db_err) = error else {
        return None;
    };
    match db_err.kind() {
        DbErrorKind::UniqueViolation => Some(ConstraintViolation::Unique),
        DbErrorKind::ForeignKeyViolation => Some(ConstraintViolation::ForeignKey),
        DbErrorKind::NotNullViolation => Some(ConstraintViolation::NotNull),
        DbErrorKind::CheckViolation => Some(ConstraintViolation::Check),
        _ => None,
    }
}

/// Map a sqlx error to a sentinel, prefixing `context`.
///
/// Missing rows become `NotFound`, constraint violations `NotValid` and
/// everything else `Internal`.
pub fn classify(error: SqlxError, context: &str) -> PersistenceError {
    if matches!(error, SqlxError::RowNotFound) {
        return PersistenceError::not_found(format!("{context}: not found"));
    }
    match constraint_violation(&error) {
        Some(_) => PersistenceError::not_valid(format!("{context}: {error}")),
        None => PersistenceError::internal(format!("{context}: {error}")),
    }
}

/// Roll `tx` back after `error`; a failed rollback is reported as
/// `Internal` with the original error kept in the message.
pub async fn rollback(tx: Transaction<'_, Sqlite>, error: PersistenceError) -> PersistenceError {
    match tx.rollback().await {
        Ok(()) => error,
        Err(rollback_err) => {
            PersistenceError::internal(format!("rolling back transaction: {rollback_err} ({error})"))
        },
    }
}
