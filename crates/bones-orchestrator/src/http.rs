use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tokio::{net::TcpListener, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bones_model::{DesiredDeployment, ProgressMessage};

use crate::{
    error::OrchestratorError,
    progress::{ProgressSink, stream_body},
    service::Orchestrator,
};

const NDJSON: &str = "application/x-ndjson";

/// HTTP front door of the orchestrator.
pub struct OrchestratorHttp {
    orchestrator: Arc<Orchestrator>,
    max_archive_bytes: usize,
}

impl OrchestratorHttp {
    pub fn new(orchestrator: Arc<Orchestrator>, max_archive_bytes: usize) -> Self {
        Self {
            orchestrator,
            max_archive_bytes,
        }
    }

    /// Build the router.
    ///
    /// Routes:
    /// - GET /version
    /// - POST /image?name=<name> - build and push a tar(.gz) build context, streams progress
    /// - POST /deploy - apply a deployment document, streams progress
    pub fn router(self) -> Router {
        Router::new()
            .route("/version", get(version))
            .route(
                "/image",
                post(push_image).layer(DefaultBodyLimit::max(self.max_archive_bytes)),
            )
            .route("/deploy", post(deploy))
            .with_state(self.orchestrator)
    }
}

/// Serve `http` on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    http: OrchestratorHttp,
    cancel: CancellationToken,
) -> Result<(), OrchestratorError> {
    info!(addr = ?listener.local_addr().ok(), "orchestrator listening");
    axum::serve(listener, http.router())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("orchestrator stopped");
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ImageQuery {
    #[serde(default)]
    name: Option<String>,
}

fn streaming(rx: mpsc::Receiver<ProgressMessage>) -> Response {
    ([(header::CONTENT_TYPE, NDJSON)], stream_body(rx)).into_response()
}

/// Refuse a request with a single error record.
fn reject(err: OrchestratorError) -> Response {
    warn!(error = %err, "request rejected");
    let line = ProgressMessage::error(err.status(), err.to_string())
        .to_line()
        .unwrap_or_else(|_| format!("{err}\n"));
    (StatusCode::BAD_REQUEST, [(header::CONTENT_TYPE, NDJSON)], line).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /version
async fn version() -> String {
    crate::version()
}

/// POST /image?name=<name>
async fn push_image(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(q): Query<ImageQuery>,
    archive: Bytes,
) -> Response {
    let name = match q.name {
        Some(name) if !name.is_empty() => name,
        _ => return reject(OrchestratorError::InvalidImageName(String::new())),
    };

    let (sink, rx) = ProgressSink::channel();
    tokio::spawn(async move {
        let pushed = orchestrator
            .images()
            .push(&name, archive.to_vec(), &sink)
            .await;
        if let Err(e) = pushed {
            warn!(image = %name, error = %e, "image push failed");
            sink.error(&e).await;
        }
    });
    streaming(rx)
}

/// POST /deploy
async fn deploy(State(orchestrator): State<Arc<Orchestrator>>, body: Bytes) -> Response {
    let desired = match DesiredDeployment::from_slice(&body) {
        Ok(desired) => desired,
        Err(e) => return reject(e.into()),
    };
    info!(
        machines = desired.machines.ips.len(),
        containers = desired.containers.len(),
        "deploy requested"
    );

    let (sink, rx) = ProgressSink::channel();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.pipeline().deploy(desired, sink.clone()).await {
            warn!(error = %e, "deploy aborted");
            sink.error(&e).await;
        }
    });
    streaming(rx)
}
