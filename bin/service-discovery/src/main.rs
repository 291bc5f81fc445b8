use anyhow::{Context, Result};
use discovery_core::{bootstrap, DiscoveryConfig, ServiceRegistry, TcpDialer, Watcher};
use discovery_etcd::EtcdClient;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const REPORT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting service-discovery daemon...");

    let config = DiscoveryConfig::from_env().context("loading discovery configuration")?;
    info!("Coordination store endpoints: {:?}", config.etcd_endpoints);
    info!("Service root: {}", config.service_root);

    let store = Arc::new(EtcdClient::from_config(&config).context("creating etcd client")?);
    let registry = Arc::new(ServiceRegistry::new(TcpDialer::new(config.dial_timeout)));

    // Serving without an initial view is worse than not starting
    if let Err(e) = bootstrap(store.as_ref(), &registry, &config.service_root).await {
        error!("Initial service scan failed: {}", e);
        return Err(e).context("bootstrapping service registry");
    }

    let cancel = CancellationToken::new();
    let watcher =
        Watcher::from_config(store.clone(), registry.clone(), &config).spawn(cancel.clone());

    // Periodic pool report until shutdown
    let mut report = tokio::time::interval(REPORT_INTERVAL);
    loop {
        tokio::select! {
            _ = report.tick() => report_registry(&registry).await,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutdown signal received");
                break;
            }
        }
    }

    cancel.cancel();
    if let Err(e) = watcher.await {
        error!("Watcher task failed: {}", e);
    }

    info!("service-discovery stopped");
    Ok(())
}

async fn report_registry(registry: &ServiceRegistry<TcpDialer>) {
    let snapshot = registry.snapshot().await;
    info!("Service registry has {} services", snapshot.len());

    let mut names: Vec<&String> = snapshot.keys().collect();
    names.sort();
    for name in names {
        let keys = &snapshot[name];
        debug!("  {}: {} endpoints {:?}", name, keys.len(), keys);
    }
}
