//! Prefect workflow scheduler client
//!
//! Workflow keys use underscores (`generate_node_documents`) while Prefect
//! flow names use dashes (`generate-node-documents`). [`flow_name_for`] and
//! [`workflow_key_for`] convert between the two.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::clients::{ClientError, check_status, decode_json};

/// Prefect deployment as returned by the REST API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub name: String,
    /// Resolved flow name; filled from `flow_id` by [`HttpPrefectClient::list_deployments`]
    #[serde(default)]
    pub flow_name: String,
    #[serde(default)]
    pub flow_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameter_openapi_schema: Option<JsonValue>,
}

/// Flow run created from a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRun {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub deployment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Flow {
    id: String,
    name: String,
}

/// Prefect flow name for a workflow key.
pub fn flow_name_for(workflow_key: &str) -> String {
    workflow_key.replace('_', "-")
}

/// Workflow key for a Prefect flow name.
pub fn workflow_key_for(flow_name: &str) -> String {
    flow_name.replace('-', "_")
}

/// Operations the service needs from the workflow scheduler
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    async fn get_deployment_by_name(
        &self,
        workflow_key: &str,
        deployment_name: &str,
    ) -> Result<Deployment, ClientError>;

    async fn create_flow_run(
        &self,
        deployment_id: &str,
        parameters: Map<String, JsonValue>,
    ) -> Result<FlowRun, ClientError>;

    async fn list_deployments(&self) -> Result<Vec<Deployment>, ClientError>;

    async fn cancel_flow_run(&self, flow_run_id: &str) -> Result<(), ClientError>;
}

/// Prefect client over the Prefect server REST API
#[derive(Debug, Clone)]
pub struct HttpPrefectClient {
    client: Client,
    base_url: String,
}

impl HttpPrefectClient {
    /// `base_url` is the Prefect API root, e.g. `http://prefect:4200/api`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| ClientError::Configuration(format!("invalid Prefect base url: {}", e)))?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn list_flows(&self) -> Result<Vec<Flow>, ClientError> {
        let response = self
            .client
            .post(self.url("/flows/filter"))
            .json(&json!({ "limit": 200 }))
            .send()
            .await?;
        decode_json(check_status(response, || "flows".to_string()).await?).await
    }
}

#[async_trait]
impl SchedulerClient for HttpPrefectClient {
    async fn get_deployment_by_name(
        &self,
        workflow_key: &str,
        deployment_name: &str,
    ) -> Result<Deployment, ClientError> {
        let flow_name = flow_name_for(workflow_key);
        debug!(flow_name, deployment_name, "Resolving Prefect deployment");

        let response = self
            .client
            .get(self.url(&format!(
                "/deployments/name/{}/{}",
                flow_name, deployment_name
            )))
            .send()
            .await?;
        let mut deployment: Deployment = decode_json(
            check_status(response, || {
                format!("deployment {}/{}", flow_name, deployment_name)
            })
            .await?,
        )
        .await?;

        if deployment.flow_name.is_empty() {
            deployment.flow_name = flow_name;
        }
        Ok(deployment)
    }

    async fn create_flow_run(
        &self,
        deployment_id: &str,
        parameters: Map<String, JsonValue>,
    ) -> Result<FlowRun, ClientError> {
        let response = self
            .client
            .post(self.url(&format!("/deployments/{}/create_flow_run", deployment_id)))
            .json(&json!({ "parameters": parameters }))
            .send()
            .await?;
        decode_json(check_status(response, || format!("deployment {}", deployment_id)).await?)
            .await
    }

    async fn list_deployments(&self) -> Result<Vec<Deployment>, ClientError> {
        let response = self
            .client
            .post(self.url("/deployments/filter"))
            .json(&json!({ "limit": 200 }))
            .send()
            .await?;
        let mut deployments: Vec<Deployment> =
            decode_json(check_status(response, || "deployments".to_string()).await?).await?;

        let flows = self.list_flows().await?;
        for deployment in &mut deployments {
            if let Some(flow_id) = &deployment.flow_id
                && let Some(flow) = flows.iter().find(|flow| &flow.id == flow_id)
            {
                deployment.flow_name = flow.name.clone();
            }
        }

        Ok(deployments)
    }

    async fn cancel_flow_run(&self, flow_run_id: &str) -> Result<(), ClientError> {
        // Reject ids that are not UUIDs before interpolating them into a path
        Uuid::parse_str(flow_run_id).map_err(|_| {
            ClientError::Configuration(format!("invalid flow run id {}", flow_run_id))
        })?;

        let response = self
            .client
            .post(self.url(&format!("/flow_runs/{}/set_state", flow_run_id)))
            .json(&json!({
                "state": { "type": "CANCELLING" },
                "force": true,
            }))
            .send()
            .await?;
        check_status(response, || format!("flow run {}", flow_run_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpPrefectClient {
        HttpPrefectClient::new(&format!("{}/api", server.uri()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_deployment_lookup_uses_flow_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/deployments/name/generate-node-documents/default"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "2f0c7a52-7a7e-4bd4-9a53-cfd64e1f4b11",
                "name": "default",
                "flow_id": "flow-1",
                "tags": ["type:node"]
            })))
            .mount(&server)
            .await;

        let deployment = client(&server)
            .get_deployment_by_name("generate_node_documents", "default")
            .await
            .unwrap();

        assert_eq!(deployment.flow_name, "generate-node-documents");
        assert_eq!(deployment.tags, vec!["type:node".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_deployment_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/deployments/name/outline/default"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server)
            .get_deployment_by_name("outline", "default")
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_create_flow_run_wraps_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/deployments/dep-1/create_flow_run"))
            .and(body_json(json!({ "parameters": { "run_id": 5 } })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "flow-run-5",
                "name": "brave-otter",
                "deployment_id": "dep-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut parameters = Map::new();
        parameters.insert("run_id".into(), json!(5));
        let flow_run = client(&server)
            .create_flow_run("dep-1", parameters)
            .await
            .unwrap();

        assert_eq!(flow_run.id, "flow-run-5");
    }

    #[tokio::test]
    async fn test_list_deployments_resolves_flow_names() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/deployments/filter"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "d1", "name": "default", "flow_id": "f1" },
                { "id": "d2", "name": "default", "flow_id": "unknown" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/flows/filter"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "f1", "name": "sync-to-mysql" }
            ])))
            .mount(&server)
            .await;

        let deployments = client(&server).list_deployments().await.unwrap();

        assert_eq!(deployments.len(), 2);
        assert_eq!(deployments[0].flow_name, "sync-to-mysql");
        assert_eq!(deployments[1].flow_name, "");
    }

    #[tokio::test]
    async fn test_cancel_sets_cancelling_state() {
        let server = MockServer::start().await;
        let flow_run_id = "7d9b2c4e-3f1a-4b5c-8d6e-9f0a1b2c3d4e";
        Mock::given(method("POST"))
            .and(path(format!("/api/flow_runs/{}/set_state", flow_run_id)))
            .and(body_json(json!({
                "state": { "type": "CANCELLING" },
                "force": true
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).cancel_flow_run(flow_run_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_rejects_non_uuid_ids() {
        let server = MockServer::start().await;

        let err = client(&server)
            .cancel_flow_run("../../admin")
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[test]
    fn test_flow_name_conversion() {
        assert_eq!(flow_name_for("generate_node_documents"), "generate-node-documents");
        assert_eq!(workflow_key_for("sync-to-mysql"), "sync_to_mysql");
        assert_eq!(workflow_key_for(&flow_name_for("a_b_c")), "a_b_c");
    }

    #[test]
    fn test_invalid_base_url_is_configuration_error() {
        let err = HttpPrefectClient::new("not a url", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }
}
