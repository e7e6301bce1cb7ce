use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bones_model::NodeObservation;

use super::actor::StoreRequest;
use crate::runtime::{RuntimeClient, RuntimeError};

/// Periodically observes one node and reports to the store.
pub(super) struct Poller {
    pub(super) client: Arc<dyn RuntimeClient>,
    pub(super) tx: mpsc::WeakSender<StoreRequest>,
    pub(super) nudge: Arc<Notify>,
    pub(super) interval: Duration,
    pub(super) cancel: CancellationToken,
}

impl Poller {
    pub(super) async fn run(self) {
        let node = self.client.node().to_string();
        loop {
            match observe(self.client.as_ref()).await {
                Ok(observation) => {
                    let Some(tx) = self.tx.upgrade() else { return };
                    if tx.send(StoreRequest::Observed(observation)).await.is_err() {
                        return;
                    }
                    debug!(node = %node, "node observed");
                }
                Err(e) => warn!(node = %node, error = %e, "poll failed, retrying next interval"),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.nudge.notified() => debug!(node = %node, "early poll requested"),
            }
        }
    }
}

async fn observe(client: &dyn RuntimeClient) -> Result<NodeObservation, RuntimeError> {
    let containers = client.list_containers().await?;
    let images = client.list_images().await?;
    Ok(NodeObservation {
        node: client.node().to_string(),
        containers,
        images,
        last_updated: SystemTime::now(),
    })
}
