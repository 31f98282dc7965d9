//! Service Cache - keeps service instances from Consul cached and load balanced

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use svc_cache_consul::ConsulClientConfig;
use svc_cache_core::{ConsulRetriever, ServiceCache};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Config, LoggingConfig};

/// Service Cache - cached, load balanced lookups over Consul services
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Consul agent address
    #[arg(long, env = "SVC_CACHE_CONSUL")]
    consul: Option<String>,

    /// Services to watch (overrides the configured list)
    #[arg(short, long = "service", env = "SVC_CACHE_SERVICES", value_delimiter = ',')]
    services: Vec<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep the cache refreshed until interrupted (default)
    Run,
    /// Resolve a watched service to one address and exit
    Resolve {
        /// Service name
        service: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    config.apply_overrides(args.consul, args.services);

    init_logging(&config.logging);

    info!("Starting Service Cache v{}", env!("CARGO_PKG_VERSION"));

    if config.cache.services.is_empty() {
        bail!("No services to watch; set cache.services or pass --service");
    }

    let retriever = ConsulRetriever::new(ConsulClientConfig {
        request_timeout: Duration::from_secs(config.consul.request_timeout_secs),
    })
    .map_err(|e| anyhow!("Failed to create Consul retriever: {}", e))?;

    let cache = Arc::new(ServiceCache::with_retriever(
        config.consul.address.clone(),
        config.cache.services.clone(),
        Arc::new(retriever),
    ));

    match args.command.unwrap_or(Command::Run) {
        Command::Resolve { service } => {
            if !cache.is_watched(&[service.as_str()]) {
                cache.watch_services([service.clone()])?;
            }
            let address = cache.get_address(&service).await?;
            println!("{}", address);
            Ok(())
        }
        Command::Run => run(cache, &config).await,
    }
}

/// Start the cache and keep it refreshed until a shutdown signal arrives
async fn run(cache: Arc<ServiceCache>, config: &Config) -> Result<()> {
    if let Some(listen) = &config.metrics.listen {
        let addr: SocketAddr = listen
            .parse()
            .with_context(|| format!("Invalid metrics listen address: {}", listen))?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }

    cache
        .start(
            config.cache.refresh_interval(),
            config.cache.max_retries,
            config.cache.retry_delay(),
        )
        .await?;

    info!(
        "Watching {:?} via {}",
        cache.watched_services(),
        cache.backend_address()
    );

    let errors = spawn_error_logger(cache.clone());
    let reporter = (config.cache.report_interval_secs > 0)
        .then(|| spawn_report_task(cache.clone(), config.cache.report_interval_secs));

    shutdown_signal().await?;

    stop_cache(&cache);
    errors.abort();
    if let Some(reporter) = reporter {
        reporter.abort();
    }

    info!("Service cache stopped");
    Ok(())
}

/// Stop periodic refresh, noting when there was nothing to stop
fn stop_cache(cache: &ServiceCache) -> bool {
    let stopped = cache.stop();
    if !stopped {
        warn!("Service cache was not running at shutdown");
    }
    stopped
}

/// Drain failed scheduled refreshes so they surface in the logs
fn spawn_error_logger(cache: Arc<ServiceCache>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(e) = cache.next_error().await {
            error!("Scheduled refresh failed: {}", e);
        }
    })
}

/// Spawn a background task that logs a snapshot of the cache periodically
fn spawn_report_task(
    cache: Arc<ServiceCache>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    use tokio::time::interval;

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(interval_secs));

        loop {
            ticker.tick().await;
            match serde_json::to_string(&cache.snapshot()) {
                Ok(snapshot) => info!("Cache snapshot: {}", snapshot),
                Err(e) => error!("Failed to serialize cache snapshot: {}", e),
            }
        }
    })
}

/// Initialize logging
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C handler")?;
    info!("Shutdown signal received");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_cache_when_not_running() {
        let cache = ServiceCache::new("127.0.0.1:8500", ["acl-service"]).unwrap();
        assert!(!stop_cache(&cache));
        assert!(!cache.is_running());
    }
}
