//! Supporting services on the orchestrator's own host: the image registry and the gatekeeper.
//!
//! Each is brought up in the background (retrying until it runs) and its `host:port` address
//! published through a watch channel. Readers wait until the address is known.

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bones_core::{RuntimeClient, port_key};
use bones_model::repository_name;

use crate::{config::InfraImage, error::OrchestratorError};

/// Addresses of the supporting services, once they are known.
#[derive(Clone, Debug)]
pub struct InfraHandle {
    registry: watch::Receiver<Option<String>>,
    gatekeeper: watch::Receiver<Option<String>>,
}

impl InfraHandle {
    /// Handle whose addresses are known upfront.
    pub fn ready(registry: impl Into<String>, gatekeeper: impl Into<String>) -> Self {
        let (_, registry) = watch::channel(Some(registry.into()));
        let (_, gatekeeper) = watch::channel(Some(gatekeeper.into()));
        Self {
            registry,
            gatekeeper,
        }
    }

    /// Wait for the registry address.
    pub async fn registry(&self) -> Result<String, OrchestratorError> {
        wait_published(self.registry.clone(), "registry").await
    }

    /// Wait for the gatekeeper address.
    pub async fn gatekeeper(&self) -> Result<String, OrchestratorError> {
        wait_published(self.gatekeeper.clone(), "gatekeeper").await
    }
}

async fn wait_published(
    mut rx: watch::Receiver<Option<String>>,
    what: &'static str,
) -> Result<String, OrchestratorError> {
    let value = rx
        .wait_for(Option::is_some)
        .await
        .map_err(|_| OrchestratorError::InfraUnavailable(what))?;
    value
        .clone()
        .ok_or(OrchestratorError::InfraUnavailable(what))
}

/// Start bringing up the registry and the gatekeeper on `runtime`.
pub fn bootstrap(
    runtime: Arc<dyn RuntimeClient>,
    registry: InfraImage,
    gatekeeper: InfraImage,
    retry: Duration,
    cancel: &CancellationToken,
) -> InfraHandle {
    InfraHandle {
        registry: spawn_service(Arc::clone(&runtime), registry, retry, cancel.child_token()),
        gatekeeper: spawn_service(runtime, gatekeeper, retry, cancel.child_token()),
    }
}

fn spawn_service(
    runtime: Arc<dyn RuntimeClient>,
    image: InfraImage,
    retry: Duration,
    cancel: CancellationToken,
) -> watch::Receiver<Option<String>> {
    let (tx, rx) = watch::channel(None);
    tokio::spawn(async move {
        loop {
            match ensure_running(runtime.as_ref(), &image).await {
                Ok(address) => {
                    info!(image = %image.image, address = %address, "supporting service running");
                    // Keep the sender alive so waiting readers never see a closed channel.
                    tx.send_replace(Some(address));
                    cancel.cancelled().await;
                    return;
                }
                Err(e) => warn!(image = %image.image, error = %e, "supporting service not ready"),
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(retry) => {}
            }
        }
    });
    rx
}

/// Make sure a container of `image` runs and return its published `host:port`.
async fn ensure_running(
    runtime: &dyn RuntimeClient,
    image: &InfraImage,
) -> Result<String, OrchestratorError> {
    let repository = repository_name(&image.image);
    let running = runtime
        .list_containers()
        .await?
        .into_iter()
        .find(|c| c.repository() == repository);

    let id = match running {
        Some(container) => container.id,
        None => {
            info!(image = %image.image, "supporting service not running, starting it");
            runtime.load_image(&image.image).await?;
            runtime
                .run_image(&image.image, &[], std::slice::from_ref(&image.port))
                .await?
        }
    };

    let bindings = runtime.inspect_container(&id).await?;
    let host_port = bindings
        .get(&port_key(&image.port))
        .ok_or(OrchestratorError::InfraUnavailable("published port"))?;
    Ok(format!("{}:{}", runtime.node(), host_port))
}
