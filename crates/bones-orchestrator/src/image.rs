use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::sync::mpsc;
use tracing::info;

use bones_core::{DaemonLines, RuntimeClient, RuntimeError};

use crate::{
    catalog::ImageCatalog, error::OrchestratorError, infra::InfraHandle, progress::ProgressSink,
};

const DAEMON_LINE_BUFFER: usize = 16;

/// Builds images on the orchestrator host and pushes them to the registry.
#[derive(Clone)]
pub struct ImageBuilder {
    runtime: Arc<dyn RuntimeClient>,
    infra: InfraHandle,
    catalog: ImageCatalog,
}

impl ImageBuilder {
    pub fn new(runtime: Arc<dyn RuntimeClient>, infra: InfraHandle, catalog: ImageCatalog) -> Self {
        Self {
            runtime,
            infra,
            catalog,
        }
    }

    /// Build `name` from a tar(.gz) build context, tag it for the registry, push it and
    /// record it in the catalog.
    ///
    /// Returns the registry reference.
    pub async fn push(
        &self,
        name: &str,
        archive: Vec<u8>,
        progress: &ProgressSink,
    ) -> Result<String, OrchestratorError> {
        validate_name(name)?;

        progress
            .message("Waiting for the registry, this may take a while")
            .await;
        let registry = self.infra.registry().await?;

        progress.message("Building image").await;
        let built = format!("{name}:{}", unix_now());
        relay(progress, |lines| self.runtime.build_image(archive, &built, lines)).await?;

        progress.message("Tagging").await;
        self.runtime.tag_image(&built, name).await?;
        let reference = format!("{registry}/{name}");
        self.runtime.tag_image(&built, &reference).await?;

        progress.message("Pushing to registry").await;
        relay(progress, |lines| self.runtime.push_image(&reference, lines)).await?;

        self.catalog.record(name, &reference);
        info!(image = %name, reference = %reference, "image pushed");
        progress.message(format!("Built {reference}")).await;
        Ok(reference)
    }
}

/// Run a streaming daemon call, forwarding each of its lines to `progress` as it arrives.
async fn relay<F>(
    progress: &ProgressSink,
    call: impl FnOnce(DaemonLines) -> F,
) -> Result<(), OrchestratorError>
where
    F: Future<Output = Result<(), RuntimeError>>,
{
    let (tx, mut rx) = mpsc::channel(DAEMON_LINE_BUFFER);
    let forward = async {
        while let Some(line) = rx.recv().await {
            progress.message(line).await;
        }
    };
    // The call owns the sender, so forwarding ends once the call returns.
    let (result, ()) = tokio::join!(call(tx), forward);
    result.map_err(OrchestratorError::from)
}

fn validate_name(name: &str) -> Result<(), OrchestratorError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidImageName(name.to_string()))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
