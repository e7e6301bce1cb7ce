use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::{Notify, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use bones_model::{ClusterState, NodeAddr, NodeObservation};

use super::poller::Poller;
use crate::runtime::RuntimeConnector;

pub(super) enum StoreRequest {
    Snapshot {
        reply: oneshot::Sender<ClusterState>,
    },
    Register {
        node: NodeAddr,
        reply: oneshot::Sender<bool>,
    },
    Observed(NodeObservation),
}

struct NodeEntry {
    observation: NodeObservation,
    nudge: Arc<Notify>,
}

/// Sole owner of the cluster state map; handles one request at a time in arrival order.
pub(super) struct StoreActor {
    rx: mpsc::Receiver<StoreRequest>,
    tx: mpsc::WeakSender<StoreRequest>,
    connector: Arc<dyn RuntimeConnector>,
    poll_interval: Duration,
    cancel: CancellationToken,
    nodes: HashMap<NodeAddr, NodeEntry>,
}

impl StoreActor {
    pub(super) fn new(
        rx: mpsc::Receiver<StoreRequest>,
        tx: mpsc::WeakSender<StoreRequest>,
        connector: Arc<dyn RuntimeConnector>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rx,
            tx,
            connector,
            poll_interval,
            cancel,
            nodes: HashMap::new(),
        }
    }

    pub(super) async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                req = self.rx.recv() => match req {
                    Some(req) => self.handle(req),
                    None => break,
                },
            }
        }
        self.cancel.cancel();
        debug!(nodes = self.nodes.len(), "cluster state store stopped");
    }

    fn handle(&mut self, req: StoreRequest) {
        match req {
            StoreRequest::Snapshot { reply } => {
                let state: ClusterState = self
                    .nodes
                    .iter()
                    .map(|(node, entry)| (node.clone(), entry.observation.clone()))
                    .collect();
                let _ = reply.send(state);
            }
            StoreRequest::Register { node, reply } => {
                let added = self.register(node);
                let _ = reply.send(added);
            }
            StoreRequest::Observed(observation) => {
                match self.nodes.get_mut(&observation.node) {
                    Some(entry) => entry.observation = observation,
                    None => {
                        debug!(node = %observation.node, "dropping observation of unknown node")
                    }
                }
            }
        }
    }

    fn register(&mut self, node: NodeAddr) -> bool {
        if let Some(entry) = self.nodes.get(&node) {
            debug!(node = %node, "node already tracked, requesting an early poll");
            entry.nudge.notify_one();
            return false;
        }

        let nudge = Arc::new(Notify::new());
        let poller = Poller {
            client: self.connector.connect(&node),
            tx: self.tx.clone(),
            nudge: Arc::clone(&nudge),
            interval: self.poll_interval,
            cancel: self.cancel.child_token(),
        };
        tokio::spawn(poller.run());

        info!(node = %node, "tracking node");
        self.nodes.insert(
            node.clone(),
            NodeEntry {
                observation: NodeObservation::empty(node),
                nudge,
            },
        );
        true
    }
}
