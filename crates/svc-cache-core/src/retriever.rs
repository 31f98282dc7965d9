//! Instance retrieval from the discovery backend

use async_trait::async_trait;
use svc_cache_consul::{AgentService, ConsulClient, ConsulClientConfig};
use tracing::debug;

use crate::error::BoxError;
use crate::instance::Instance;

/// Source of the full set of known service instances
///
/// Implementations must not touch cache internals; the cache calls `fetch`
/// outside of its table lock, concurrently with lookups.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return every instance the backend at `address` currently knows about
    async fn fetch(&self, address: &str) -> Result<Vec<Instance>, BoxError>;
}

impl From<AgentService> for Instance {
    fn from(service: AgentService) -> Self {
        Instance {
            id: service.id,
            service: service.service,
            address: service.address,
            port: service.port,
            tags: service.tags.unwrap_or_default(),
        }
    }
}

/// Default retriever backed by the Consul agent service catalog
pub struct ConsulRetriever {
    client: ConsulClient,
}

impl ConsulRetriever {
    pub fn new(config: ConsulClientConfig) -> Result<Self, BoxError> {
        Ok(Self {
            client: ConsulClient::new(config)?,
        })
    }
}

#[async_trait]
impl Retriever for ConsulRetriever {
    async fn fetch(&self, address: &str) -> Result<Vec<Instance>, BoxError> {
        let services = self.client.agent_services(address).await?;
        debug!("Retrieved {} service instances from {}", services.len(), address);
        Ok(services.into_values().map(Instance::from).collect())
    }
}
