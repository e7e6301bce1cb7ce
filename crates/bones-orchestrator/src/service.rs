use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use bones_core::{ClusterStateStore, DockerConnector, RuntimeConnector};

use crate::{
    catalog::ImageCatalog, config::OrchestratorConfig, credentials::HttpGatekeeper,
    error::OrchestratorError, image::ImageBuilder, infra::bootstrap, pipeline::DeploymentPipeline,
};

/// Everything the HTTP front door drives.
pub struct Orchestrator {
    pipeline: DeploymentPipeline,
    images: ImageBuilder,
}

impl Orchestrator {
    pub fn new(pipeline: DeploymentPipeline, images: ImageBuilder) -> Self {
        Self { pipeline, images }
    }

    /// Wire the production collaborators and start the background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        cfg: &OrchestratorConfig,
        cancel: &CancellationToken,
    ) -> Result<Arc<Self>, OrchestratorError> {
        cfg.validate()?;

        let connector: Arc<dyn RuntimeConnector> = Arc::new(DockerConnector::new(cfg.runtime_port));
        let host = connector.connect(&cfg.host);
        let infra = bootstrap(
            Arc::clone(&host),
            cfg.registry.clone(),
            cfg.gatekeeper.clone(),
            cfg.infra_retry,
            cancel,
        );
        let catalog = ImageCatalog::new();
        let store = ClusterStateStore::start(Arc::clone(&connector), &cfg.store, cancel);

        let pipeline = DeploymentPipeline::new(
            store,
            connector,
            Arc::new(HttpGatekeeper::default()),
            infra.clone(),
            catalog.clone(),
            cfg.orchestrator_key.clone(),
        );
        let images = ImageBuilder::new(host, infra, catalog);

        info!(host = %cfg.host, runtime_port = cfg.runtime_port, "orchestrator started");
        Ok(Arc::new(Self::new(pipeline, images)))
    }

    pub fn pipeline(&self) -> &DeploymentPipeline {
        &self.pipeline
    }

    pub fn images(&self) -> &ImageBuilder {
        &self.images
    }
}
