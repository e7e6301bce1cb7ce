//! Access to the container runtime daemon of a node.
//!
//! [`RuntimeClient`] is bound to one node; [`RuntimeConnector`] hands out clients by address
//! so the state store and the deployment pipeline never build transports themselves.

mod docker;
pub use docker::{DEFAULT_RUNTIME_PORT, DockerClient, DockerConnector};

mod error;
pub use error::RuntimeError;

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::mpsc;
use bones_model::{ObservedContainer, ObservedImage};

/// Container port (`5000/tcp`) -> published host port.
pub type PortBindings = BTreeMap<String, String>;

/// Receives the progress text of a streamed daemon answer, one record at a time.
///
/// A dropped receiver only silences the output; the daemon call still runs to completion.
pub type DaemonLines = mpsc::Sender<String>;

#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Address of the node this client talks to.
    fn node(&self) -> &str;

    async fn list_containers(&self) -> Result<Vec<ObservedContainer>, RuntimeError>;

    async fn list_images(&self) -> Result<Vec<ObservedImage>, RuntimeError>;

    /// Build `reference` from a tar (optionally gzipped) build context.
    ///
    /// Daemon output is forwarded to `lines` as it arrives.
    async fn build_image(
        &self,
        archive: Vec<u8>,
        reference: &str,
        lines: DaemonLines,
    ) -> Result<(), RuntimeError>;

    /// Make `image` also known as `repo` (`:latest`).
    async fn tag_image(&self, image: &str, repo: &str) -> Result<(), RuntimeError>;

    /// Push `image` to the registry named by its prefix.
    ///
    /// Daemon output is forwarded to `lines` as it arrives.
    async fn push_image(&self, image: &str, lines: DaemonLines) -> Result<(), RuntimeError>;

    /// Pull `image` onto the node.
    async fn load_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create and start a container, publishing every exposed port on a daemon-chosen host port.
    ///
    /// Returns the container id.
    async fn run_image(
        &self,
        image: &str,
        env: &[String],
        exposed_ports: &[String],
    ) -> Result<String, RuntimeError>;

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn delete_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn inspect_container(&self, id: &str) -> Result<PortBindings, RuntimeError>;
}

/// Factory of per-node runtime clients.
pub trait RuntimeConnector: Send + Sync {
    fn connect(&self, node: &str) -> Arc<dyn RuntimeClient>;
}

/// Normalise an exposed port spec to the `port/proto` form the daemon expects.
pub fn port_key(port: &str) -> String {
    let port = port.trim();
    if port.contains('/') {
        port.to_string()
    } else {
        format!("{port}/tcp")
    }
}
