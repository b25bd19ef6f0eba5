//! SIP listing, lookup and workflow history

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::{parse_uuid, IngestError, IngestService, Result};
use crate::models::{Sip, SipStatus, WorkflowWithTasks};
use crate::persistence::filter::Sort;
use crate::persistence::{Page, SipFilter};
use crate::timerange::Range;

/// Filter payload of the SIP listing. Every value arrives as text and is
/// validated before it reaches persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListSipsQuery {
    pub name: Option<String>,
    pub aip_uuid: Option<String>,
    pub location_uuid: Option<String>,
    pub status: Option<String>,
    /// RFC3339 lower bound of `created_at`.
    pub earliest_created_time: Option<String>,
    /// RFC3339 upper bound of `created_at`.
    pub latest_created_time: Option<String>,
    pub uploader_uuid: Option<String>,
    /// Comma separated field names, `-` prefix for descending order.
    pub sort: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SipsPage {
    pub items: Vec<Sip>,
    pub page: Page,
}

fn parse_opt_uuid(field: &str, value: Option<&str>) -> Result<Option<Uuid>> {
    value
        .map(|v| Uuid::parse_str(v).map_err(|_| IngestError::not_valid(format!("{field}: invalid UUID"))))
        .transpose()
}

impl ListSipsQuery {
    pub fn to_filter(&self) -> Result<SipFilter> {
        let aip_id = parse_opt_uuid("aip_uuid", self.aip_uuid.as_deref())?;
        let location_id = parse_opt_uuid("location_uuid", self.location_uuid.as_deref())?;
        let uploader_id = parse_opt_uuid("uploader_uuid", self.uploader_uuid.as_deref())?;
        let status = self
            .status
            .as_deref()
            .map(|s| s.parse::<SipStatus>())
            .transpose()
            .map_err(|_| IngestError::not_valid("status: invalid value"))?;
        let created_at = Range::parse(
            self.earliest_created_time.as_deref(),
            self.latest_created_time.as_deref(),
        )
        .map_err(|e| IngestError::not_valid(format!("created at: {e}")))?;

        Ok(SipFilter {
            name: self.name.clone(),
            aip_id,
            location_id,
            status,
            created_at,
            uploader_id,
            sort: self.sort.as_deref().map(Sort::parse).unwrap_or_default(),
            limit: self.limit.unwrap_or_default(),
            offset: self.offset.unwrap_or_default(),
        })
    }

    #[tracing::instrument(skip(self, ingest))]
    pub async fn handle(&self, ingest: &IngestService) -> Result<SipsPage> {
        let filter = self.to_filter()?;
        let (items, page) = ingest
            .persistence
            .list_sips(&filter)
            .await
            .map_err(|e| IngestError::from_read(e, "list SIPs"))?;
        Ok(SipsPage { items, page })
    }
}

impl IngestService {
    pub(crate) async fn read_sip(&self, uuid: &str) -> Result<Sip> {
        let uuid = parse_uuid(uuid)?;
        self.persistence.read_sip(uuid).await.map_err(|e| {
            if e.is_not_found() {
                IngestError::sip_not_found(uuid)
            } else {
                IngestError::from_read(e, "read SIP")
            }
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn show_sip(&self, uuid: &str) -> Result<Sip> {
        self.read_sip(uuid).await
    }

    /// Workflows of a SIP in start order, each with its tasks.
    #[tracing::instrument(skip(self))]
    pub async fn list_sip_workflows(&self, uuid: &str) -> Result<Vec<WorkflowWithTasks>> {
        let sip = self.read_sip(uuid).await?;
        let workflows = self
            .persistence
            .list_workflows(sip.uuid)
            .await
            .map_err(|e| IngestError::from_read(e, "list workflows"))?;

        let mut items = Vec::with_capacity(workflows.len());
        for workflow in workflows {
            let tasks = self
                .persistence
                .list_tasks(workflow.id)
                .await
                .map_err(|e| IngestError::from_read(e, "list tasks"))?;
            items.push(WorkflowWithTasks { workflow, tasks });
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_is_empty_filter() {
        assert_eq!(ListSipsQuery::default().to_filter().unwrap(), SipFilter::default());
    }

    #[test]
    fn test_field_qualified_errors() {
        let cases = [
            (
                ListSipsQuery {
                    aip_uuid: Some("x".into()),
                    ..Default::default()
                },
                "aip_uuid: invalid UUID",
            ),
            (
                ListSipsQuery {
                    uploader_uuid: Some("x".into()),
                    ..Default::default()
                },
                "uploader_uuid: invalid UUID",
            ),
            (
                ListSipsQuery {
                    status: Some("bogus".into()),
                    ..Default::default()
                },
                "status: invalid value",
            ),
        ];
        for (query, message) in cases {
            assert_eq!(query.to_filter(), Err(IngestError::not_valid(message)));
        }
    }

    #[test]
    fn test_created_at_range() {
        let query = ListSipsQuery {
            earliest_created_time: Some("2024-08-02T00:00:00Z".into()),
            latest_created_time: Some("2024-08-01T00:00:00Z".into()),
            ..Default::default()
        };
        let err = query.to_filter().unwrap_err();
        assert!(err.to_string().starts_with("created at: "), "{err}");

        let query = ListSipsQuery {
            earliest_created_time: Some("2024-08-01T00:00:00Z".into()),
            status: Some("Queued".into()),
            sort: Some("-created_at".into()),
            ..Default::default()
        };
        let filter = query.to_filter().unwrap();
        assert!(filter.created_at.is_some());
        assert_eq!(filter.status, Some(SipStatus::Queued));
        assert_eq!(filter.sort, Sort::new().add_col("created_at", true));
    }
}
