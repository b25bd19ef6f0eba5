//! Batch operations
//!
//! Batches are stored by persistence but cannot yet be submitted or listed
//! through the public API.

use serde::{Deserialize, Serialize};

use crate::ingest::{IngestError, IngestService, Result};
use crate::models::Batch;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddBatchCommand {
    pub source_id: String,
    pub keys: Vec<String>,
    #[serde(default)]
    pub identifier: Option<String>,
}

impl IngestService {
    // TODO: start the batch workflow once batch progress is reported by the engine.
    pub async fn add_batch(&self, _command: AddBatchCommand) -> Result<Batch> {
        Err(IngestError::NotImplemented)
    }

    pub async fn list_batches(&self) -> Result<Vec<Batch>> {
        Err(IngestError::NotImplemented)
    }

    pub async fn show_batch(&self, _uuid: &str) -> Result<Batch> {
        Err(IngestError::NotImplemented)
    }
}
