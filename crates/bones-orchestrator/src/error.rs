use thiserror::Error;

use bones_core::{CoreError, RuntimeError};
use bones_gatekeeper::GatekeeperError;
use bones_model::ModelError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid deployment: {0}")]
    Validation(#[from] ModelError),

    #[error("invalid image name {0:?}")]
    InvalidImageName(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("gatekeeper: {0}")]
    Gatekeeper(#[from] GatekeeperError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("no image pushed for {0}, push it through /image first")]
    ImageNotBuilt(String),

    #[error("container {0} is not part of the deployment")]
    UnknownContainer(String),

    #[error("{0} is not available")]
    InfraUnavailable(&'static str),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("orchestrator server failed: {0}")]
    Server(#[from] std::io::Error),

    #[error("orchestrator unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid orchestrator address: {0}")]
    InvalidAddress(String),

    #[error("no orchestrator answered")]
    NotFound,

    #[error("unreadable progress stream: {0}")]
    Stream(#[source] ModelError),

    /// Error record received from an orchestrator stream.
    #[error("orchestrator failed ({status}): {message}")]
    Remote { status: String, message: String },
}

impl OrchestratorError {
    /// Status carried by the error record this error is streamed as.
    pub fn status(&self) -> &'static str {
        match self {
            OrchestratorError::Validation(_) | OrchestratorError::InvalidImageName(_) => "400",
            _ => "500",
        }
    }
}
