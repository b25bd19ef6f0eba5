//! Client for the preservation storage API

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::oidc::{AccessTokenProvider, BearerClient, BearerError, OidcConfig, OidcTokenProvider};

#[derive(Error, Debug)]
pub enum StorageClientError {
    #[error("storage API: not found: {0}")]
    NotFound(String),

    #[error("storage API returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("storage API: {0}")]
    Request(#[from] BearerError),

    #[error("storage API: invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aip {
    pub name: String,
    pub aip_id: Uuid,
    pub status: String,
    pub object_key: Uuid,
    pub location_id: Option<Uuid>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source: String,
    pub purpose: String,
    pub created_at: String,
}

#[derive(Serialize)]
struct MoveRequest {
    location_id: Uuid,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Clone)]
pub struct StorageClient {
    base_url: Url,
    http: BearerClient,
}

impl StorageClient {
    pub fn new(base_url: Url, http: BearerClient) -> Self {
        Self { base_url, http }
    }

    /// Build a client, with OIDC bearer authentication when enabled.
    pub async fn connect(address: &str, oidc: &OidcConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(address)?;
        let client = Client::new();
        let provider: Option<Arc<dyn AccessTokenProvider>> = if oidc.enabled {
            Some(Arc::new(OidcTokenProvider::new(client.clone(), oidc).await?))
        } else {
            None
        };
        Ok(Self::new(base_url, BearerClient::new(client, provider)))
    }

    fn url(&self, path: &str) -> Result<Url, StorageClientError> {
        Ok(self.base_url.join(path)?)
    }

    async fn check(response: reqwest::Response, what: String) -> Result<reqwest::Response, StorageClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(StorageClientError::NotFound(what));
        }
        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_default();
        Err(StorageClientError::Status { status, message })
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn show_aip(
        &self,
        aip_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Aip, StorageClientError> {
        let url = self.url(&format!("storage/package/{aip_id}"))?;
        let response = self.http.send(self.http.client().get(url), cancel).await?;
        let response = Self::check(response, format!("AIP {aip_id}")).await?;
        Ok(response.json().await.map_err(BearerError::from)?)
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn list_locations(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Location>, StorageClientError> {
        let url = self.url("storage/location")?;
        let response = self.http.send(self.http.client().get(url), cancel).await?;
        let response = Self::check(response, "locations".to_string()).await?;
        Ok(response.json().await.map_err(BearerError::from)?)
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn move_aip(
        &self,
        aip_id: Uuid,
        location_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), StorageClientError> {
        let url = self.url(&format!("storage/package/{aip_id}/store"))?;
        let request = self
            .http
            .client()
            .post(url)
            .json(&MoveRequest { location_id });
        let response = self.http.send(request, cancel).await?;
        Self::check(response, format!("AIP {aip_id}")).await?;
        Ok(())
    }
}
