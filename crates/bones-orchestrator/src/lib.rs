//! Orchestrator: tracks the cluster, diffs it against submitted deployments and launches the
//! missing containers with gatekeeper-issued credentials.

mod catalog;
pub use catalog::ImageCatalog;

mod client;
pub use client::{OrchestratorClient, find_orchestrator};

mod config;
pub use config::{DEFAULT_ORCHESTRATOR_PORT, InfraImage, OrchestratorConfig};

pub mod credentials;
pub use credentials::{GatekeeperConnect, HttpGatekeeper};

mod error;
pub use error::OrchestratorError;

mod http;
pub use http::{OrchestratorHttp, serve};

mod image;
pub use image::ImageBuilder;

mod infra;
pub use infra::{InfraHandle, bootstrap};

mod pipeline;
pub use pipeline::{DeploySummary, DeploymentPipeline};

mod progress;
pub use progress::{ProgressSink, stream_body};

mod service;
pub use service::Orchestrator;

/// Answer of `GET /version`.
pub fn version() -> String {
    format!("orchestrator v{}", env!("CARGO_PKG_VERSION"))
}
