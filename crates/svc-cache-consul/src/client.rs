//! Consul agent client

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ConsulError;

/// Consul client configuration
#[derive(Clone, Debug)]
pub struct ConsulClientConfig {
    /// Timeout applied to every request against the agent
    pub request_timeout: Duration,
}

impl Default for ConsulClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// A service registered with the local Consul agent
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct AgentService {
    #[serde(rename = "ID")]
    pub id: String,
    pub service: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub meta: Option<HashMap<String, String>>,
}

/// Consul HTTP API client
///
/// The client is not bound to a single agent: every query takes the agent
/// address, so one client can be shared by callers that point at different
/// agents.
pub struct ConsulClient {
    client: Client,
}

impl ConsulClient {
    /// Create a new Consul client
    pub fn new(config: ConsulClientConfig) -> Result<Self, ConsulError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        info!(
            "Created Consul client (request timeout: {:?})",
            config.request_timeout
        );

        Ok(Self { client })
    }

    /// List every service registered with the agent, keyed by service ID
    pub async fn agent_services(
        &self,
        address: &str,
    ) -> Result<HashMap<String, AgentService>, ConsulError> {
        let url = format!("{}/v1/agent/services", base_url(address));

        debug!("Fetching agent services: {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status != StatusCode::OK {
            return Err(ConsulError::UpstreamError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body = response.text().await?;
        let services: HashMap<String, AgentService> = serde_json::from_str(&body)
            .map_err(|e| ConsulError::InvalidResponse(e.to_string()))?;

        debug!("Agent at {} reported {} services", address, services.len());
        Ok(services)
    }
}

/// Normalize an agent address into a base URL, defaulting to plain HTTP
fn base_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICES_BODY: &str = r#"{
        "auth-1": {
            "ID": "auth-1",
            "Service": "authentication-service",
            "Tags": ["public", "interactive-lecture"],
            "Address": "192.168.2.1",
            "Port": 80,
            "Meta": {"version": "1"}
        },
        "acl-1": {
            "ID": "acl-1",
            "Service": "acl-service",
            "Tags": null,
            "Address": "192.168.2.4",
            "Port": 8080
        }
    }"#;

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("discovery:8500"), "http://discovery:8500");
        assert_eq!(base_url("http://discovery:8500/"), "http://discovery:8500");
        assert_eq!(base_url("https://consul.local"), "https://consul.local");
    }

    #[tokio::test]
    async fn test_agent_services() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/agent/services")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(SERVICES_BODY)
            .create_async()
            .await;

        let client = ConsulClient::new(ConsulClientConfig::default()).unwrap();
        let services = client.agent_services(&server.url()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(services.len(), 2);

        let auth = &services["auth-1"];
        assert_eq!(auth.service, "authentication-service");
        assert_eq!(auth.address, "192.168.2.1");
        assert_eq!(auth.port, 80);
        assert_eq!(auth.tags.as_deref().unwrap().len(), 2);

        let acl = &services["acl-1"];
        assert!(acl.tags.is_none());
        assert!(acl.meta.is_none());
    }

    #[tokio::test]
    async fn test_agent_services_without_scheme() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/agent/services")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = ConsulClient::new(ConsulClientConfig::default()).unwrap();
        let services = client
            .agent_services(&server.host_with_port())
            .await
            .unwrap();
        assert!(services.is_empty());
    }

    #[tokio::test]
    async fn test_agent_services_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/agent/services")
            .with_status(500)
            .with_body("agent unavailable")
            .create_async()
            .await;

        let client = ConsulClient::new(ConsulClientConfig::default()).unwrap();
        let err = client.agent_services(&server.url()).await.unwrap_err();
        match err {
            ConsulError::UpstreamError { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "agent unavailable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_agent_services_invalid_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/agent/services")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = ConsulClient::new(ConsulClientConfig::default()).unwrap();
        let err = client.agent_services(&server.url()).await.unwrap_err();
        assert!(matches!(err, ConsulError::InvalidResponse(_)));
    }
}
