//! One deploy request, end to end.
//!
//! Register the machines, wait for a fresh observation, diff, then deploy every missing
//! container. Nodes are handled concurrently, containers on one node one after another.
//! A failing container is reported and skipped; it never aborts the others.

use std::{fmt, sync::Arc, time::SystemTime};

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use bones_core::{ClusterStateStore, RuntimeClient, RuntimeConnector, compute_diff};
use bones_gatekeeper::SecretApi;
use bones_model::{DeploymentDiff, DesiredDeployment, ProgressMessage};

use crate::{
    catalog::ImageCatalog,
    credentials::{GatekeeperConnect, container_env, provision},
    error::OrchestratorError,
    infra::InfraHandle,
    progress::ProgressSink,
};

/// Outcome counts of one deploy.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeploySummary {
    pub deployed: usize,
    pub failed: usize,
}

impl DeploySummary {
    fn merge(&mut self, other: DeploySummary) {
        self.deployed += other.deployed;
        self.failed += other.failed;
    }
}

impl fmt::Display for DeploySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Deploy finished: {} deployed, {} failed",
            self.deployed, self.failed
        )
    }
}

pub struct DeploymentPipeline {
    store: ClusterStateStore,
    connector: Arc<dyn RuntimeConnector>,
    gatekeepers: Arc<dyn GatekeeperConnect>,
    infra: InfraHandle,
    catalog: ImageCatalog,
    key: String,
}

impl DeploymentPipeline {
    pub fn new(
        store: ClusterStateStore,
        connector: Arc<dyn RuntimeConnector>,
        gatekeepers: Arc<dyn GatekeeperConnect>,
        infra: InfraHandle,
        catalog: ImageCatalog,
        key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            connector,
            gatekeepers,
            infra,
            catalog,
            key: key.into(),
        }
    }

    /// Bring the cluster to `desired`, streaming progress to `progress`.
    ///
    /// Errors are returned only when the whole request has to stop; per-container failures
    /// are streamed as error records and counted in the summary.
    pub async fn deploy(
        &self,
        desired: DesiredDeployment,
        progress: ProgressSink,
    ) -> Result<DeploySummary, OrchestratorError> {
        progress.message("Starting deploy").await;

        let since = SystemTime::now();
        for ip in &desired.machines.ips {
            self.store.add_node(ip).await?;
            progress.message(format!("Adding ip {ip}")).await;
        }

        progress.message("Waiting for node refreshes").await;
        self.store.wait_for_freshness(since).await?;

        // Every tracked node, including ones registered by earlier deploys.
        let observed = self.store.snapshot().await?;
        let diff = compute_diff(&desired, &observed);
        progress.message(describe(&diff)).await;

        let mut summary = DeploySummary::default();
        if diff.is_empty() {
            progress.message(summary.to_string()).await;
            return Ok(summary);
        }

        let gatekeeper = self.infra.gatekeeper().await?;
        let secrets = self.gatekeepers.connect(&gatekeeper, &self.key)?;
        let desired = Arc::new(desired);

        let mut tasks = JoinSet::new();
        for (node, containers) in diff {
            let target = NodeTarget {
                runtime: self.connector.connect(&node),
                node,
                containers,
                desired: Arc::clone(&desired),
                secrets: Arc::clone(&secrets),
                gatekeeper: gatekeeper.clone(),
                catalog: self.catalog.clone(),
                progress: progress.clone(),
            };
            tasks.spawn(target.run());
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(node_summary) => summary.merge(node_summary),
                Err(e) => {
                    error!(error = %e, "node deployment task failed");
                    let msg = format!("node deployment aborted: {e}");
                    progress.send(ProgressMessage::error("500", msg)).await;
                }
            }
        }

        info!(deployed = summary.deployed, failed = summary.failed, "deploy finished");
        progress.message(summary.to_string()).await;
        Ok(summary)
    }
}

/// Containers to deploy on one node.
struct NodeTarget {
    node: String,
    containers: Vec<String>,
    runtime: Arc<dyn RuntimeClient>,
    desired: Arc<DesiredDeployment>,
    secrets: Arc<dyn SecretApi>,
    gatekeeper: String,
    catalog: ImageCatalog,
    progress: ProgressSink,
}

impl NodeTarget {
    async fn run(self) -> DeploySummary {
        let mut summary = DeploySummary::default();
        for container in &self.containers {
            self.progress
                .message(format!("Deploying {container} on {}", self.node))
                .await;

            match self.deploy_one(container).await {
                Ok(id) => {
                    summary.deployed += 1;
                    info!(node = %self.node, container, id = %id, "container deployed");
                    self.progress
                        .message(format!("Deployed {container} on {}: {id}", self.node))
                        .await;
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(node = %self.node, container, error = %e, "container deploy failed");
                    self.progress
                        .send(ProgressMessage::error(
                            e.status(),
                            format!("{container} on {}: {e}", self.node),
                        ))
                        .await;
                }
            }
        }
        summary
    }

    async fn deploy_one(&self, container: &str) -> Result<String, OrchestratorError> {
        let spec = self
            .desired
            .containers
            .get(container)
            .ok_or_else(|| OrchestratorError::UnknownContainer(container.to_string()))?;
        let image = self.catalog.resolve(container, &spec.source)?;

        self.progress.message(format!("Loading image {image}")).await;
        self.runtime.load_image(&image).await?;

        let one_time_key = provision(self.secrets.as_ref(), &self.node, container).await?;
        let env = container_env(&self.gatekeeper, &one_time_key);

        let id = self
            .runtime
            .run_image(&image, &env, &spec.exposed_ports)
            .await?;
        Ok(id)
    }
}

fn describe(diff: &DeploymentDiff) -> String {
    if diff.is_empty() {
        return "Nothing to deploy".to_string();
    }
    let per_node: Vec<String> = diff
        .iter()
        .map(|(node, containers)| format!("{node}: {}", containers.join(", ")))
        .collect();
    format!("To deploy: {}", per_node.join("; "))
}
