//! Temporal HTTP API client

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{EngineError, ReusePolicy, StartWorkflowOptions, WorkflowEngine};

pub const DEFAULT_NAMESPACE: &str = "default";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct Named<'a> {
    name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    workflow_id: &'a str,
    workflow_type: Named<'a>,
    task_queue: Named<'a>,
    input: [Value; 1],
    workflow_id_reuse_policy: ReusePolicy,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Execution<'a> {
    workflow_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignalRequest<'a> {
    workflow_execution: Execution<'a>,
    signal_name: &'a str,
    input: [Value; 1],
}

#[derive(Debug, Clone)]
pub struct TemporalEngine {
    client: Client,
    base_url: Url,
    namespace: String,
}

impl TemporalEngine {
    pub fn new(base_url: Url, namespace: impl Into<String>) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, base_url, namespace))
    }

    pub fn with_client(client: Client, base_url: Url, namespace: impl Into<String>) -> Self {
        Self {
            client,
            base_url,
            namespace: namespace.into(),
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, EngineError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| EngineError::Transport(format!("invalid base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "v1", "namespaces", self.namespace.as_str()])
            .extend(segments);
        Ok(url)
    }

    async fn post<T: Serialize>(&self, url: Url, body: &T) -> Result<(), EngineError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or_default().to_string());
        Err(EngineError::Http {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl WorkflowEngine for TemporalEngine {
    async fn start_workflow(
        &self,
        options: &StartWorkflowOptions,
        name: &str,
        input: Value,
    ) -> Result<(), EngineError> {
        let url = self.url(&["workflows", options.id.as_str()])?;
        let body = StartRequest {
            workflow_id: &options.id,
            workflow_type: Named { name },
            task_queue: Named {
                name: &options.task_queue,
            },
            input: [input],
            workflow_id_reuse_policy: options.reuse_policy,
        };
        self.post(url, &body).await?;
        debug!(workflow_id = %options.id, workflow = name, "Started workflow");
        Ok(())
    }

    async fn signal_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
        signal: &str,
        payload: Value,
    ) -> Result<(), EngineError> {
        let url = self.url(&["workflows", workflow_id, "signal", signal])?;
        let body = SignalRequest {
            workflow_execution: Execution {
                workflow_id,
                run_id,
            },
            signal_name: signal,
            input: [payload],
        };
        self.post(url, &body).await?;
        debug!(workflow_id, signal, "Signaled workflow");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn engine(server: &MockServer) -> TemporalEngine {
        TemporalEngine::new(Url::parse(&server.uri()).unwrap(), "sipflow").unwrap()
    }

    #[tokio::test]
    async fn test_start_workflow() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/sipflow/workflows/processing-workflow-1"))
            .and(body_json(json!({
                "workflowId": "processing-workflow-1",
                "workflowType": {"name": "processing-workflow"},
                "taskQueue": {"name": "global"},
                "input": [{"key": "sip.zip"}],
                "workflowIdReusePolicy": "WORKFLOW_ID_REUSE_POLICY_ALLOW_DUPLICATE",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"runId": "r1"})))
            .expect(1)
            .mount(&server)
            .await;

        let options = StartWorkflowOptions {
            id: "processing-workflow-1".into(),
            task_queue: "global".into(),
            reuse_policy: ReusePolicy::AllowDuplicate,
        };
        engine(&server)
            .await
            .start_workflow(&options, "processing-workflow", json!({"key": "sip.zip"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_signal_workflow() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(
                "/api/v1/namespaces/sipflow/workflows/wf1/signal/review-performed-signal",
            ))
            .and(body_json(json!({
                "workflowExecution": {"workflowId": "wf1"},
                "signalName": "review-performed-signal",
                "input": [{"accepted": false}],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        engine(&server)
            .await
            .signal_workflow("wf1", None, "review-performed-signal", json!({"accepted": false}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"message": "workflow not found"})),
            )
            .mount(&server)
            .await;

        let err = engine(&server)
            .await
            .signal_workflow("wf1", Some("run"), "s", json!({}))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Http {
                status: 404,
                message: "workflow not found".into()
            }
        );
    }
}
