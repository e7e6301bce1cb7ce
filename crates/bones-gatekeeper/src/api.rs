use async_trait::async_trait;

use crate::{error::GatekeeperError, store::SecretStore};

/// Secret operations performed with one caller token.
///
/// Implemented in-process by [`ScopedStore`] and over HTTP by
/// [`GatekeeperClient`](crate::GatekeeperClient).
#[async_trait]
pub trait SecretApi: Send + Sync {
    /// Token presented on every call.
    fn token(&self) -> &str;

    async fn get(&self, item: &str) -> Result<String, GatekeeperError>;

    /// Create `item` owned by [`SecretApi::token`]; fails if it exists.
    async fn create(&self, item: &str, value: &str) -> Result<(), GatekeeperError>;

    async fn set(&self, item: &str, value: &str) -> Result<(), GatekeeperError>;

    async fn delete(&self, item: &str) -> Result<(), GatekeeperError>;

    async fn add_access(&self, item: &str, grantee: &str) -> Result<(), GatekeeperError>;

    async fn remove_access(&self, item: &str, grantee: &str) -> Result<(), GatekeeperError>;

    async fn switch_owner(&self, item: &str, new_owner: &str) -> Result<(), GatekeeperError>;
}

/// [`SecretStore`] bound to a caller token.
#[derive(Clone)]
pub struct ScopedStore {
    store: SecretStore,
    token: String,
}

impl ScopedStore {
    pub(crate) fn new(store: SecretStore, token: String) -> Self {
        Self { store, token }
    }
}

#[async_trait]
impl SecretApi for ScopedStore {
    fn token(&self) -> &str {
        &self.token
    }

    async fn get(&self, item: &str) -> Result<String, GatekeeperError> {
        self.store.get(item, &self.token)
    }

    async fn create(&self, item: &str, value: &str) -> Result<(), GatekeeperError> {
        self.store.create(item, value, &self.token)
    }

    async fn set(&self, item: &str, value: &str) -> Result<(), GatekeeperError> {
        self.store.set(item, value, &self.token)
    }

    async fn delete(&self, item: &str) -> Result<(), GatekeeperError> {
        self.store.delete(item, &self.token)
    }

    async fn add_access(&self, item: &str, grantee: &str) -> Result<(), GatekeeperError> {
        self.store.add_access(item, &self.token, grantee)
    }

    async fn remove_access(&self, item: &str, grantee: &str) -> Result<(), GatekeeperError> {
        self.store.remove_access(item, &self.token, grantee)
    }

    async fn switch_owner(&self, item: &str, new_owner: &str) -> Result<(), GatekeeperError> {
        self.store.switch_owner(item, &self.token, new_owner)
    }
}
