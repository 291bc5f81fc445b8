//! Initial synchronous scan of the service directory

use crate::{CoordinationStore, Dialer, DiscoveryError, Result, ServiceRegistry};
use tracing::{debug, info, warn};

/// Populate `registry` from a recursive listing of `root`.
///
/// Fails with `BootstrapUnavailable` when the listing cannot be obtained or
/// `root` is not a directory. Non-directory entries directly under `root`
/// are logged and skipped. Returns the number of endpoints registered.
pub async fn bootstrap<S, D>(store: &S, registry: &ServiceRegistry<D>, root: &str) -> Result<usize>
where
    S: CoordinationStore + ?Sized,
    D: Dialer,
{
    info!("Connecting services under: {}", root);

    let listing = store
        .list(root)
        .await
        .map_err(|e| DiscoveryError::BootstrapUnavailable(format!("listing {}: {}", root, e)))?;

    if !listing.dir {
        return Err(DiscoveryError::BootstrapUnavailable(format!(
            "{} is not a directory",
            root
        )));
    }

    let mut added = 0;
    for service_dir in &listing.nodes {
        if !service_dir.dir {
            warn!("{}", DiscoveryError::MalformedDirectory(service_dir.key.clone()));
            continue;
        }

        for instance in &service_dir.nodes {
            if instance.dir {
                warn!("{}", DiscoveryError::MalformedDirectory(instance.key.clone()));
                continue;
            }
            if instance.value_str().is_empty() {
                debug!("Skipping instance without address: {}", instance.key);
                continue;
            }
            // Dial failures are logged by the registry
            if registry
                .add_endpoint(&instance.key, instance.value_str())
                .await
                .is_ok()
            {
                added += 1;
            }
        }
    }

    info!(
        "Services add complete: {} endpoints across {} services",
        added,
        registry.service_count().await
    );
    Ok(added)
}
