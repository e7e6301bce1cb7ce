use std::{net::SocketAddr, time::Duration};

use bones_core::{DEFAULT_RUNTIME_PORT, StoreConfig};

use crate::{credentials::random_key, error::OrchestratorError};

/// Port the orchestrator listens on and clients connect to.
pub const DEFAULT_ORCHESTRATOR_PORT: u16 = 900;

/// A supporting container the orchestrator keeps running on its own host.
#[derive(Debug, Clone)]
pub struct InfraImage {
    pub image: String,
    /// Container port whose published host port is the service address.
    pub port: String,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub listen: SocketAddr,
    /// Address of this machine, as reachable from the nodes.
    pub host: String,
    pub runtime_port: u16,
    /// Capability token the orchestrator owns its gatekeeper objects with.
    pub orchestrator_key: String,
    pub registry: InfraImage,
    pub gatekeeper: InfraImage,
    /// Delay between two attempts to bring up a supporting container.
    pub infra_retry: Duration,
    /// Largest image build context accepted by `/image`.
    pub max_archive_bytes: usize,
    pub store: StoreConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_ORCHESTRATOR_PORT)),
            host: "127.0.0.1".to_string(),
            runtime_port: DEFAULT_RUNTIME_PORT,
            orchestrator_key: random_key(),
            registry: InfraImage {
                image: "samalba/docker-registry".to_string(),
                port: "5000".to_string(),
            },
            gatekeeper: InfraImage {
                image: "gatekeeper".to_string(),
                port: "800".to_string(),
            },
            infra_retry: Duration::from_secs(10),
            max_archive_bytes: 512 * 1024 * 1024,
            store: StoreConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.host.trim().is_empty() {
            return Err(OrchestratorError::InvalidConfig("host must be set".into()));
        }
        if self.orchestrator_key.is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "orchestrator key must not be empty".into(),
            ));
        }
        for infra in [&self.registry, &self.gatekeeper] {
            if infra.image.trim().is_empty() || infra.port.trim().is_empty() {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "supporting image {:?} needs an image and a port",
                    infra.image
                )));
            }
        }
        if self.infra_retry.is_zero() {
            return Err(OrchestratorError::InvalidConfig(
                "infra_retry must be > 0".into(),
            ));
        }
        self.store.validate()?;
        Ok(())
    }
}
