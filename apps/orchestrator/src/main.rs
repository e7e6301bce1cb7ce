use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use bones_core::{DEFAULT_RUNTIME_PORT, StoreConfig};
use bones_observe::{LoggerConfig, LoggerFormat, LoggerLevel, logger_init};
use bones_orchestrator::{
    InfraImage, Orchestrator, OrchestratorConfig, OrchestratorHttp, credentials::random_key, serve,
};

#[derive(Debug, Parser)]
#[command(name = "orchestrator", version, about = "Cluster orchestrator")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BONES_LISTEN", default_value = "0.0.0.0:900")]
    listen: SocketAddr,

    /// Address of this machine as reachable from the nodes.
    #[arg(long, env = "HOST")]
    host: String,

    /// Port of the container runtime API on every node.
    #[arg(long, env = "BONES_RUNTIME_PORT", default_value_t = DEFAULT_RUNTIME_PORT)]
    runtime_port: u16,

    /// Gatekeeper token the orchestrator owns its objects with (random when unset).
    #[arg(long, env = "BONES_ORCHESTRATOR_KEY", hide_env_values = true)]
    orchestrator_key: Option<String>,

    #[arg(long, env = "BONES_REGISTRY_IMAGE", default_value = "samalba/docker-registry")]
    registry_image: String,

    #[arg(long, env = "BONES_REGISTRY_PORT", default_value = "5000")]
    registry_port: String,

    #[arg(long, env = "BONES_GATEKEEPER_IMAGE", default_value = "gatekeeper")]
    gatekeeper_image: String,

    #[arg(long, env = "BONES_GATEKEEPER_PORT", default_value = "800")]
    gatekeeper_port: String,

    /// Seconds between two polls of a node.
    #[arg(long, env = "BONES_POLL_INTERVAL_SECS", default_value_t = 60)]
    poll_interval_secs: u64,

    #[arg(long, env = "BONES_LOG_LEVEL", default_value = "info")]
    log_level: LoggerLevel,

    /// text | json | journald
    #[arg(long, env = "BONES_LOG_FORMAT", default_value = "text")]
    log_format: LoggerFormat,
}

impl Args {
    fn config(&self) -> OrchestratorConfig {
        let defaults = OrchestratorConfig::default();
        OrchestratorConfig {
            listen: self.listen,
            host: self.host.clone(),
            runtime_port: self.runtime_port,
            orchestrator_key: self.orchestrator_key.clone().unwrap_or_else(random_key),
            registry: InfraImage {
                image: self.registry_image.clone(),
                port: self.registry_port.clone(),
            },
            gatekeeper: InfraImage {
                image: self.gatekeeper_image.clone(),
                port: self.gatekeeper_port.clone(),
            },
            store: StoreConfig {
                poll_interval: Duration::from_secs(self.poll_interval_secs),
                ..defaults.store.clone()
            },
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let logger = LoggerConfig {
        format: args.log_format,
        level: args.log_level.clone(),
        ..Default::default()
    };
    logger_init(&logger)?;

    let cfg = args.config();
    cfg.validate()?;

    let cancel = CancellationToken::new();
    let orchestrator = Orchestrator::start(&cfg, &cancel)?;
    let listener = TcpListener::bind(cfg.listen).await?;

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down...");
            shutdown.cancel();
        }
    });

    serve(
        listener,
        OrchestratorHttp::new(orchestrator, cfg.max_archive_bytes),
        cancel,
    )
    .await?;
    Ok(())
}
