//! Service cache implementation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use metrics::counter;
use parking_lot::{Mutex, RwLock};
use svc_cache_consul::ConsulClientConfig;
use tracing::{debug, info, warn};

use super::scheduler::{Signals, Ticker};
use super::table::{InstanceTable, ServiceSnapshot};
use crate::error::CacheError;
use crate::instance::Instance;
use crate::retriever::{ConsulRetriever, Retriever};

/// In-memory cache of service instances resolved from a discovery backend
///
/// The cache is shared as `Arc<ServiceCache>`; the periodic refresh task holds
/// only a weak reference, so dropping the last handle also ends the task at its
/// next tick.
pub struct ServiceCache {
    backend_address: RwLock<String>,
    retriever: RwLock<Arc<dyn Retriever>>,
    table: InstanceTable,
    pub(super) running: AtomicBool,
    pub(super) ticker: Mutex<Option<Ticker>>,
    pub(super) signals: Signals,
}

impl ServiceCache {
    /// Create a stopped cache using the Consul agent at `backend_address`
    pub fn new<I, S>(backend_address: impl Into<String>, services: I) -> Result<Self, CacheError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let retriever = default_retriever()?;
        Ok(Self::with_retriever(backend_address, services, retriever))
    }

    /// Create a stopped cache with a custom retriever
    pub fn with_retriever<I, S>(
        backend_address: impl Into<String>,
        services: I,
        retriever: Arc<dyn Retriever>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend_address = backend_address.into();
        let table = InstanceTable::new(services);

        info!(
            "Initializing service cache (backend: {}, services: {:?})",
            backend_address,
            table.watched()
        );

        Self {
            backend_address: RwLock::new(backend_address),
            retriever: RwLock::new(retriever),
            table,
            running: AtomicBool::new(false),
            ticker: Mutex::new(None),
            signals: Signals::new(),
        }
    }

    /// Re-initialize the backend address and watched services
    ///
    /// Every watched list starts out empty and the default Consul retriever is
    /// installed again.
    pub fn configure<I, S>(
        &self,
        backend_address: impl Into<String>,
        services: I,
    ) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_stopped("configure")?;
        let retriever = default_retriever()?;

        let backend_address = backend_address.into();
        info!("Reconfiguring service cache (backend: {})", backend_address);

        *self.backend_address.write() = backend_address;
        *self.retriever.write() = retriever;
        self.table.reset();
        self.table.register(services);
        Ok(())
    }

    /// Replace the retriever used for refreshes
    pub fn set_retriever(&self, retriever: Arc<dyn Retriever>) -> Result<(), CacheError> {
        self.ensure_stopped("change retriever")?;
        *self.retriever.write() = retriever;
        Ok(())
    }

    /// Add services to the watch set; an already watched service is reset to empty
    pub fn watch_services<I, S>(&self, services: I) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_stopped("watch services")?;
        self.table.register(services);
        Ok(())
    }

    /// Whether every given service is watched
    pub fn is_watched<S: AsRef<str>>(&self, services: &[S]) -> bool {
        self.table.is_watched(services)
    }

    /// Names of all watched services, sorted
    pub fn watched_services(&self) -> Vec<String> {
        self.table.watched()
    }

    /// Whether a successful `start` has not yet been followed by `stop`
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address of the discovery backend passed to the retriever
    pub fn backend_address(&self) -> String {
        self.backend_address.read().clone()
    }

    /// Fetch the current instance set and repopulate every watched service
    ///
    /// A backend failure leaves the table untouched. A validation error means
    /// the table holds the fresh data but at least one watched service came
    /// back empty.
    pub async fn refresh(&self) -> Result<(), CacheError> {
        let retriever = self.retriever.read().clone();
        let address = self.backend_address();

        counter!("svc_cache_refresh_total").increment(1);

        let instances = match retriever.fetch(&address).await {
            Ok(instances) => instances,
            Err(e) => {
                counter!("svc_cache_refresh_failures_total").increment(1);
                warn!("Failed to retrieve services from {}: {}", address, e);
                return Err(CacheError::Backend(e));
            }
        };

        debug!("Refreshing cache with {} instances", instances.len());

        if let Err(e) = self.table.replace_all(instances) {
            counter!("svc_cache_refresh_failures_total").increment(1);
            warn!("Refresh left a watched service empty: {}", e);
            return Err(e);
        }

        Ok(())
    }

    /// Resolve `service` to one of its known instances, chosen at random
    ///
    /// The first lookup of a service that has no instances yet triggers a
    /// synchronous refresh.
    pub async fn get_instance(&self, service: &str) -> Result<Arc<Instance>, CacheError> {
        if let Some(instance) = self.table.select(service)? {
            return Ok(instance);
        }

        info!("Initial request for service {}, refreshing", service);
        let cause = self.refresh().await.err();

        match self.table.select(service)? {
            Some(instance) => Ok(instance),
            None => Err(CacheError::Unavailable {
                service: service.to_string(),
                cause: cause.map(Box::new),
            }),
        }
    }

    /// Resolve `service` to an `address:port` string
    pub async fn get_address(&self, service: &str) -> Result<String, CacheError> {
        let instance = self.get_instance(service).await?;
        Ok(instance.socket_address())
    }

    /// Current instances of `service` without triggering a refresh
    pub fn instances(&self, service: &str) -> Option<Vec<Arc<Instance>>> {
        self.table.instances(service)
    }

    /// Per-service instance counts and last refresh time
    pub fn snapshot(&self) -> Vec<ServiceSnapshot> {
        self.table.snapshot()
    }

    fn ensure_stopped(&self, action: &str) -> Result<(), CacheError> {
        if self.is_running() {
            return Err(CacheError::Configuration(format!(
                "can't {} on running cache",
                action
            )));
        }
        Ok(())
    }
}

fn default_retriever() -> Result<Arc<dyn Retriever>, CacheError> {
    let retriever =
        ConsulRetriever::new(ConsulClientConfig::default()).map_err(CacheError::Backend)?;
    Ok(Arc::new(retriever))
}
