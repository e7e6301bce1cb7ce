use std::net::SocketAddr;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use bones_gatekeeper::{
    DEFAULT_MAX_BODY_BYTES, GatekeeperConfig, GatekeeperHttp, SecretStore, serve,
};
use bones_observe::{LoggerConfig, LoggerFormat, LoggerLevel, logger_init};

#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about = "Capability secret store")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BONES_LISTEN", default_value = "0.0.0.0:800")]
    listen: SocketAddr,

    /// Largest accepted request body, in bytes.
    #[arg(long, env = "BONES_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    max_body_bytes: usize,

    #[arg(long, env = "BONES_LOG_LEVEL", default_value = "info")]
    log_level: LoggerLevel,

    /// text | json | journald
    #[arg(long, env = "BONES_LOG_FORMAT", default_value = "text")]
    log_format: LoggerFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger_init(&LoggerConfig {
        format: args.log_format,
        level: args.log_level,
        ..Default::default()
    })?;

    let cfg = GatekeeperConfig {
        listen: args.listen,
        max_body_bytes: args.max_body_bytes,
    };
    let listener = TcpListener::bind(cfg.listen).await?;
    let http = GatekeeperHttp::new(SecretStore::new()).with_body_limit(cfg.max_body_bytes);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down...");
            shutdown.cancel();
        }
    });

    serve(listener, http, cancel).await?;
    Ok(())
}
