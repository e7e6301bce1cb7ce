//! Orchestrator core: node runtime access, cluster state tracking and reconciliation.

mod error;
pub use error::CoreError;

pub mod reconcile;
pub use reconcile::compute_diff;

pub mod runtime;
pub use runtime::{
    DEFAULT_RUNTIME_PORT, DaemonLines, DockerClient, DockerConnector, PortBindings, RuntimeClient,
    RuntimeConnector, RuntimeError, port_key,
};

pub mod state;
pub use state::{ClusterStateStore, StoreConfig};
