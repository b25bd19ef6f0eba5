use thiserror::Error;
use tracing::error;

use crate::persistence::{ErrorKind, PersistenceError};

/// Underlying failure of an internal error, for logs and callers only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct InternalCause(String);

/// Public error of the ingest operations.
///
/// Every variant has a stable wire name; messages are short and never carry
/// internal details. `Internal` keeps its cause as the error source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    SipNotFound { uuid: String, message: String },

    #[error("{0}")]
    NotAvailable(String),

    #[error("{0}")]
    NotValid(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{message}")]
    Internal {
        message: String,
        #[source]
        cause: Option<InternalCause>,
    },

    #[error("{0}")]
    InvalidMediaType(String),

    #[error("{0}")]
    InvalidMultipartRequest(String),

    #[error("not implemented")]
    NotImplemented,
}

impl IngestError {
    pub fn name(&self) -> &'static str {
        match self {
            IngestError::Invalid(_) => "invalid",
            IngestError::NotFound(_) => "not-found",
            IngestError::SipNotFound { .. } => "sip-not-found",
            IngestError::NotAvailable(_) => "not-available",
            IngestError::NotValid(_) => "not-valid",
            IngestError::Forbidden => "forbidden",
            IngestError::Unauthorized => "unauthorized",
            IngestError::Internal { .. } => "internal-error",
            IngestError::InvalidMediaType(_) => "invalid-media-type",
            IngestError::InvalidMultipartRequest(_) => "invalid-multipart-request",
            IngestError::NotImplemented => "not-implemented",
        }
    }

    pub fn not_valid(message: impl Into<String>) -> Self {
        IngestError::NotValid(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        IngestError::Internal {
            message: message.into(),
            cause: None,
        }
    }

    /// Attach the underlying failure to an internal error; other kinds are
    /// returned unchanged.
    pub fn with_cause(self, cause: impl ToString) -> Self {
        match self {
            IngestError::Internal { message, .. } => IngestError::Internal {
                message,
                cause: Some(InternalCause(cause.to_string())),
            },
            other => other,
        }
    }

    pub fn cause(&self) -> Option<&str> {
        match self {
            IngestError::Internal {
                cause: Some(InternalCause(cause)),
                ..
            } => Some(cause),
            _ => None,
        }
    }

    /// Generic message used when the cause must not be disclosed.
    pub fn not_available() -> Self {
        IngestError::NotAvailable("cannot perform operation".into())
    }

    pub fn sip_not_found(uuid: impl ToString) -> Self {
        IngestError::SipNotFound {
            uuid: uuid.to_string(),
            message: "SIP not found".into(),
        }
    }

    /// Map a persistence error raised by a read.
    pub(crate) fn from_read(err: PersistenceError, context: &str) -> Self {
        match err.kind() {
            ErrorKind::NotFound => IngestError::NotFound(format!("{context}: not found")),
            ErrorKind::NotValid | ErrorKind::Invalid => IngestError::NotValid(err.message().into()),
            ErrorKind::Internal => {
                error!(error = %err, "{context}");
                IngestError::not_available()
            },
        }
    }

    /// Map a persistence error raised by a write.
    pub(crate) fn from_write(err: PersistenceError, context: &str) -> Self {
        match err.kind() {
            ErrorKind::NotFound => IngestError::NotFound(format!("{context}: not found")),
            ErrorKind::NotValid | ErrorKind::Invalid => IngestError::NotValid(err.message().into()),
            ErrorKind::Internal => {
                error!(error = %err, "{context}");
                IngestError::internal(format!("{context}: internal error")).with_cause(err)
            },
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
