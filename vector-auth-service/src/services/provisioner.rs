//! Neon project provisioning client.
//!
//! Creates one Neon project per user and hands back its identifier and the
//! first connection URI the API reports.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::error::ProviderError;
use crate::config::NeonConfig;

/// A freshly created external database.
#[derive(Debug, Clone)]
pub struct ProvisionedResource {
    pub resource_id: String,
    pub connection_uri: Secret<String>,
}

#[async_trait]
pub trait ResourceProvisioner: Send + Sync {
    async fn create(&self) -> Result<ProvisionedResource, ProviderError>;
}

/// Response from `POST /projects`.
#[derive(Debug, Deserialize)]
struct CreateProjectResponse {
    project: ProjectDto,
    #[serde(default)]
    connection_uris: Vec<ConnectionUriDto>,
}

#[derive(Debug, Deserialize)]
struct ProjectDto {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ConnectionUriDto {
    connection_uri: String,
}

/// Neon API client.
#[derive(Clone)]
pub struct NeonClient {
    client: Client,
    config: NeonConfig,
}

impl NeonClient {
    pub fn new(config: NeonConfig) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build Neon HTTP client: {}", e))?;

        Ok(Self { client, config })
    }

    fn projects_url(&self) -> String {
        format!("{}/projects", self.config.api_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ResourceProvisioner for NeonClient {
    #[tracing::instrument(skip(self))]
    async fn create(&self) -> Result<ProvisionedResource, ProviderError> {
        let response = self
            .client
            .post(self.projects_url())
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&serde_json::json!({ "project": {} }))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to contact Neon API");
                ProviderError::Network(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "Neon project creation failed");
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let resource = parse_create_project(&body)?;
        tracing::info!(resource_id = %resource.resource_id, "Neon project created");
        Ok(resource)
    }
}

fn parse_create_project(body: &str) -> Result<ProvisionedResource, ProviderError> {
    let parsed: CreateProjectResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

    if parsed.project.id.trim().is_empty() {
        return Err(ProviderError::MalformedResponse(
            "project id is empty".to_string(),
        ));
    }

    let connection_uri = parsed
        .connection_uris
        .into_iter()
        .next()
        .map(|c| c.connection_uri)
        .filter(|uri| !uri.trim().is_empty())
        .ok_or_else(|| {
            ProviderError::MalformedResponse("response has no connection URI".to_string())
        })?;

    Ok(ProvisionedResource {
        resource_id: parsed.project.id,
        connection_uri: Secret::new(connection_uri),
    })
}

/// Scripted provisioner for tests.
pub struct MockProvisioner {
    calls: AtomicUsize,
    failure: Mutex<Option<ProviderError>>,
}

impl Default for MockProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvisioner {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failure: Mutex::new(None),
        }
    }

    /// Make the next `create` call fail with `err`.
    pub fn fail_next(&self, err: ProviderError) {
        *self.failure.lock().unwrap_or_else(|p| p.into_inner()) = Some(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceProvisioner for MockProvisioner {
    async fn create(&self) -> Result<ProvisionedResource, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        // Suspend like a real network call so concurrent resolutions interleave.
        tokio::task::yield_now().await;
        if let Some(err) = self.failure.lock().unwrap_or_else(|p| p.into_inner()).take() {
            return Err(err);
        }
        Ok(ProvisionedResource {
            resource_id: format!("mock-project-{}", n),
            connection_uri: Secret::new(format!("postgres://mock/{}", n)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> NeonClient {
        NeonClient::new(NeonConfig {
            api_key: Secret::new("neon-key".to_string()),
            api_url: server.uri(),
            timeout_seconds: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_parse_uses_first_connection_uri() {
        let body = r#"{
            "project": {"id": "proj-123", "name": "x"},
            "connection_uris": [
                {"connection_uri": "postgres://first"},
                {"connection_uri": "postgres://second"}
            ]
        }"#;
        let resource = parse_create_project(body).unwrap();
        assert_eq!(resource.resource_id, "proj-123");
        assert_eq!(resource.connection_uri.expose_secret(), "postgres://first");
    }

    #[test]
    fn test_parse_rejects_missing_connection_uri() {
        let body = r#"{"project": {"id": "proj-123"}, "connection_uris": []}"#;
        assert!(matches!(
            parse_create_project(body),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_rejects_missing_project() {
        let body = r#"{"connection_uris": [{"connection_uri": "postgres://x"}]}"#;
        assert!(matches!(
            parse_create_project(body),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_create_posts_empty_project() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects"))
            .and(header("authorization", "Bearer neon-key"))
            .and(body_json(serde_json::json!({ "project": {} })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "project": {"id": "proj-abc"},
                "connection_uris": [{"connection_uri": "postgres://u:p@host/db"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resource = client_for(&server).create().await.unwrap();
        assert_eq!(resource.resource_id, "proj-abc");
    }

    #[tokio::test]
    async fn test_non_success_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects"))
            .respond_with(ResponseTemplate::new(422).set_body_string("project limit exceeded"))
            .mount(&server)
            .await;

        let err = client_for(&server).create().await.unwrap_err();
        match err {
            ProviderError::Api { status, body } => {
                assert_eq!(status, 422);
                assert_eq!(body, "project limit exceeded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mock_provisioner_fails_once() {
        let mock = MockProvisioner::new();
        mock.fail_next(ProviderError::Network("down".into()));
        assert!(mock.create().await.is_err());
        assert!(mock.create().await.is_ok());
        assert_eq!(mock.calls(), 2);
    }
}
