use axum::{
    Router,
    extract::{DefaultBodyLimit, Path, Query, State},
    routing::{get, post},
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{config::DEFAULT_MAX_BODY_BYTES, error::GatekeeperError, store::SecretStore};

/// HTTP surface of a [`SecretStore`].
pub struct GatekeeperHttp {
    store: SecretStore,
    max_body_bytes: usize,
}

impl GatekeeperHttp {
    pub fn new(store: SecretStore) -> Self {
        Self {
            store,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_body_limit(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Build the router.
    ///
    /// Routes (caller token in the `key` query parameter, empty when absent):
    /// - GET /object/{item} - read
    /// - PUT /object/{item} - create with the body as value
    /// - POST /object/{item} - overwrite with the body
    /// - DELETE /object/{item} - delete
    /// - POST /permissions/{item} - grant read to the token in the body
    /// - DELETE /permissions/{item} - revoke read from the token in the body
    /// - PUT /permissions/{item} - hand ownership to the token in the body
    /// - GET /version
    pub fn router(self) -> Router {
        Router::new()
            .route("/version", get(version))
            .route(
                "/object/{item}",
                get(get_object)
                    .put(create_object)
                    .post(set_object)
                    .delete(delete_object),
            )
            .route(
                "/permissions/{item}",
                post(add_access).delete(remove_access).put(switch_owner),
            )
            .layer(DefaultBodyLimit::max(self.max_body_bytes))
            .with_state(self.store)
    }
}

/// Serve `http` on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    http: GatekeeperHttp,
    cancel: CancellationToken,
) -> Result<(), GatekeeperError> {
    info!(addr = ?listener.local_addr().ok(), "gatekeeper listening");
    axum::serve(listener, http.router())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("gatekeeper stopped");
    Ok(())
}

#[derive(Debug, Deserialize)]
struct KeyQuery {
    #[serde(default)]
    key: String,
}

fn denied<'a>(item: &'a str, op: &'static str) -> impl FnOnce(&GatekeeperError) + 'a {
    move |e: &GatekeeperError| debug!(item, op, error = %e, "request refused")
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /version
async fn version() -> String {
    crate::version()
}

/// GET /object/{item}
async fn get_object(
    State(store): State<SecretStore>,
    Path(item): Path<String>,
    Query(q): Query<KeyQuery>,
) -> Result<String, GatekeeperError> {
    store.get(&item, &q.key).inspect_err(denied(&item, "get"))
}

/// PUT /object/{item}
async fn create_object(
    State(store): State<SecretStore>,
    Path(item): Path<String>,
    Query(q): Query<KeyQuery>,
    value: String,
) -> Result<(), GatekeeperError> {
    store
        .create(&item, &value, &q.key)
        .inspect_err(denied(&item, "create"))
}

/// POST /object/{item}
async fn set_object(
    State(store): State<SecretStore>,
    Path(item): Path<String>,
    Query(q): Query<KeyQuery>,
    value: String,
) -> Result<(), GatekeeperError> {
    store.set(&item, &value, &q.key).inspect_err(denied(&item, "set"))
}

/// DELETE /object/{item}
async fn delete_object(
    State(store): State<SecretStore>,
    Path(item): Path<String>,
    Query(q): Query<KeyQuery>,
) -> Result<(), GatekeeperError> {
    store.delete(&item, &q.key).inspect_err(denied(&item, "delete"))
}

/// POST /permissions/{item}
async fn add_access(
    State(store): State<SecretStore>,
    Path(item): Path<String>,
    Query(q): Query<KeyQuery>,
    grantee: String,
) -> Result<(), GatekeeperError> {
    store
        .add_access(&item, &q.key, &grantee)
        .inspect_err(denied(&item, "add_access"))
}

/// DELETE /permissions/{item}
async fn remove_access(
    State(store): State<SecretStore>,
    Path(item): Path<String>,
    Query(q): Query<KeyQuery>,
    grantee: String,
) -> Result<(), GatekeeperError> {
    store
        .remove_access(&item, &q.key, &grantee)
        .inspect_err(denied(&item, "remove_access"))
}

/// PUT /permissions/{item}
async fn switch_owner(
    State(store): State<SecretStore>,
    Path(item): Path<String>,
    Query(q): Query<KeyQuery>,
    new_owner: String,
) -> Result<(), GatekeeperError> {
    store
        .switch_owner(&item, &q.key, &new_owner)
        .inspect_err(denied(&item, "switch_owner"))
}
