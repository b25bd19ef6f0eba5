use serde::{Deserialize, Serialize};
use tracing::error;

use crate::ingest::{parse_uuid, IngestError, IngestService, Result};
use crate::sipsource::{ListOptions, Page, SipSourceError, Sort};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListSipSourceObjectsQuery {
    /// Cursor returned as `next_token` by the previous page.
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

impl ListSipSourceObjectsQuery {
    /// Objects of the SIP source `source_id`, newest first.
    #[tracing::instrument(skip(self, ingest))]
    pub async fn handle(&self, ingest: &IngestService, source_id: &str) -> Result<Page> {
        let source_id = parse_uuid(source_id)?;
        if ingest.sip_source_id != Some(source_id) {
            return Err(IngestError::NotFound("SIP source not found".into()));
        }

        let opts = ListOptions {
            token: self.cursor.clone(),
            limit: self.limit.unwrap_or_default(),
            sort: Some(Sort::by_mod_time().desc()),
        };
        ingest.sip_source.list_objects(opts).await.map_err(|e| match e {
            SipSourceError::InvalidSource => IngestError::NotFound("SIP source not found".into()),
            SipSourceError::InvalidToken => IngestError::not_valid("invalid cursor"),
            other => {
                error!(error = %other, "Cannot list SIP source objects");
                IngestError::internal("error listing SIP source objects")
            },
        })
    }
}
