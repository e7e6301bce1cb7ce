//! Per-container credentials handed out through the gatekeeper.
//!
//! Each deployed container gets a fresh container key, stored by the orchestrator under
//! `key.<node>.<container>`. The workload never sees it directly: it receives a one-time
//! key whose item holds the container key, is owned by nobody, and can be read and burnt
//! with the empty token.

use std::sync::Arc;

use rand::RngCore;
use tracing::debug;

use bones_gatekeeper::{
    GatekeeperClient, GatekeeperError, SecretApi, SecretStore, one_time_item,
};

/// Environment variable carrying the gatekeeper address.
pub const GATEKEEPER_ENV: &str = "GATEKEEPER";
/// Environment variable carrying the one-time key.
pub const GATEKEEPER_KEY_ENV: &str = "GATEKEEPER_KEY";

/// Opens a gatekeeper session acting with `token`.
pub trait GatekeeperConnect: Send + Sync {
    fn connect(&self, address: &str, token: &str) -> Result<Arc<dyn SecretApi>, GatekeeperError>;
}

/// Gatekeeper reached over HTTP.
#[derive(Clone, Debug, Default)]
pub struct HttpGatekeeper {
    http: reqwest::Client,
}

impl GatekeeperConnect for HttpGatekeeper {
    fn connect(&self, address: &str, token: &str) -> Result<Arc<dyn SecretApi>, GatekeeperError> {
        let client = GatekeeperClient::with_client(self.http.clone(), address, token)?;
        Ok(Arc::new(client))
    }
}

/// In-process gatekeeper; the address is ignored.
impl GatekeeperConnect for SecretStore {
    fn connect(&self, _address: &str, token: &str) -> Result<Arc<dyn SecretApi>, GatekeeperError> {
        Ok(Arc::new(self.scoped(token)))
    }
}

/// 32 random bytes, hex encoded.
pub fn random_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Item holding the container key of `container` on `node`.
pub fn container_item(node: &str, container: &str) -> String {
    format!("key.{node}.{container}")
}

/// Mint a container key for `container` on `node` and return the one-time key redeeming it.
///
/// A container key left by an earlier deploy is overwritten.
pub async fn provision(
    secrets: &dyn SecretApi,
    node: &str,
    container: &str,
) -> Result<String, GatekeeperError> {
    let container_key = random_key();
    let one_time_key = random_key();

    let item = container_item(node, container);
    match secrets.create(&item, &container_key).await {
        Ok(()) => {}
        Err(GatekeeperError::PermissionDenied) => {
            debug!(item = %item, "container key exists, rotating it");
            secrets.set(&item, &container_key).await?;
        }
        Err(e) => return Err(e),
    }

    let alias = one_time_item(&one_time_key);
    secrets.create(&alias, &container_key).await?;
    secrets.add_access(&alias, "").await?;
    secrets.switch_owner(&alias, "").await?;

    Ok(one_time_key)
}

/// Environment injected into a deployed container.
pub fn container_env(gatekeeper: &str, one_time_key: &str) -> Vec<String> {
    vec![
        format!("{GATEKEEPER_ENV}={gatekeeper}"),
        format!("{GATEKEEPER_KEY_ENV}={one_time_key}"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORCH: &str = "orchestrator-key";

    #[test]
    fn keys_are_64_hex_chars_and_distinct() {
        let a = random_key();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, random_key());
    }

    #[tokio::test]
    async fn one_time_key_redeems_the_container_key() {
        let store = SecretStore::new();
        let secrets = store.connect("ignored", ORCH).unwrap();

        let one_time = provision(secrets.as_ref(), "10.0.0.5", "web").await.unwrap();

        let container_key = store.get(&container_item("10.0.0.5", "web"), ORCH).unwrap();
        assert_ne!(one_time, container_key);

        let alias = one_time_item(&one_time);
        assert_eq!(store.get(&alias, "").unwrap(), container_key);
        assert!(store.set(&alias, "x", ORCH).is_err());
        store.delete(&alias, "").unwrap();
        assert!(store.get(&alias, "").is_err());
    }

    #[tokio::test]
    async fn redeploy_rotates_the_container_key() {
        let store = SecretStore::new();
        let secrets = store.connect("ignored", ORCH).unwrap();
        let item = container_item("10.0.0.5", "web");

        provision(secrets.as_ref(), "10.0.0.5", "web").await.unwrap();
        let first = store.get(&item, ORCH).unwrap();
        provision(secrets.as_ref(), "10.0.0.5", "web").await.unwrap();
        let second = store.get(&item, ORCH).unwrap();

        assert_ne!(first, second);
        // container key + two one-time aliases
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn foreign_container_key_is_not_taken_over() {
        let store = SecretStore::new();
        store
            .create(&container_item("10.0.0.5", "web"), "theirs", "someone-else")
            .unwrap();
        let secrets = store.connect("ignored", ORCH).unwrap();

        let err = provision(secrets.as_ref(), "10.0.0.5", "web").await.unwrap_err();
        assert!(matches!(err, GatekeeperError::PermissionDenied));
    }

    #[test]
    fn env_names_gatekeeper_and_key() {
        assert_eq!(
            container_env("10.0.0.1:49160", "abc"),
            vec!["GATEKEEPER=10.0.0.1:49160", "GATEKEEPER_KEY=abc"]
        );
    }
}
