//! HTTP mapping of ingest errors
//!
//! Every error response carries `{"name": <wire name>, "message": <message>}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::ingest::IngestError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub name: String,
    pub message: String,
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::Invalid(_)
            | IngestError::NotValid(_)
            | IngestError::InvalidMultipartRequest(_) => StatusCode::BAD_REQUEST,
            IngestError::NotFound(_) | IngestError::SipNotFound { .. } => StatusCode::NOT_FOUND,
            IngestError::NotAvailable(_) => StatusCode::CONFLICT,
            IngestError::Forbidden => StatusCode::FORBIDDEN,
            IngestError::Unauthorized => StatusCode::UNAUTHORIZED,
            IngestError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            IngestError::InvalidMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            IngestError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(
                name = self.name(),
                cause = self.cause().unwrap_or_default(),
                "Request failed: {}",
                self
            );
        } else {
            tracing::debug!(name = self.name(), "Request rejected: {}", self);
        }

        let body = ErrorBody {
            name: self.name().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
