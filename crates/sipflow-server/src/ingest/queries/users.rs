use serde::{Deserialize, Serialize};

use crate::ingest::{IngestError, IngestService, Result};
use crate::models::User;
use crate::persistence::filter::Sort;
use crate::persistence::{Page, UserFilter};

/// Maximum byte length of the email and name filters.
pub const MAX_FILTER_LEN: usize = 255;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListUsersQuery {
    /// Matches users whose email contains the value.
    pub email: Option<String>,
    /// Matches users whose name contains the value.
    pub name: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsersPage {
    pub items: Vec<User>,
    pub page: Page,
}

fn check_len(field: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(v) if v.len() > MAX_FILTER_LEN => Err(IngestError::not_valid(format!(
            "{field}: exceeds maximum length of {MAX_FILTER_LEN}"
        ))),
        _ => Ok(()),
    }
}

impl ListUsersQuery {
    pub fn to_filter(&self) -> Result<UserFilter> {
        check_len("email", self.email.as_deref())?;
        check_len("name", self.name.as_deref())?;
        Ok(UserFilter {
            email: self.email.clone(),
            name: self.name.clone(),
            sort: self.sort.as_deref().map(Sort::parse).unwrap_or_default(),
            limit: self.limit.unwrap_or_default(),
            offset: self.offset.unwrap_or_default(),
        })
    }

    #[tracing::instrument(skip(self, ingest))]
    pub async fn handle(&self, ingest: &IngestService) -> Result<UsersPage> {
        let filter = self.to_filter()?;
        let (items, page) = ingest
            .persistence
            .list_users(&filter)
            .await
            .map_err(|e| IngestError::from_read(e, "list users"))?;
        Ok(UsersPage { items, page })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_length_limits() {
        let query = ListUsersQuery {
            email: Some("a".repeat(256)),
            ..Default::default()
        };
        assert_eq!(
            query.to_filter(),
            Err(IngestError::not_valid("email: exceeds maximum length of 255"))
        );

        let query = ListUsersQuery {
            name: Some("n".repeat(256)),
            ..Default::default()
        };
        assert_eq!(
            query.to_filter(),
            Err(IngestError::not_valid("name: exceeds maximum length of 255"))
        );

        let query = ListUsersQuery {
            email: Some("a".repeat(255)),
            sort: Some("-email".into()),
            ..Default::default()
        };
        let filter = query.to_filter().unwrap();
        assert_eq!(filter.sort, Sort::new().add_col("email", true));
    }
}
