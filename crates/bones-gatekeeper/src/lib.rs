//! Gatekeeper: a capability-addressed secret store.
//!
//! Every object has an owner token and a set of tokens allowed to read it. Callers present a
//! token with each request; nothing else identifies them. Handing a workload a secret goes
//! through a one-time key: an owner-less alias any holder can read and then delete.

mod api;
pub use api::{ScopedStore, SecretApi};

mod client;
pub use client::{GatekeeperClient, one_time_item};

mod config;
pub use config::{DEFAULT_MAX_BODY_BYTES, GatekeeperConfig};

mod error;
pub use error::GatekeeperError;

mod http;
pub use http::{GatekeeperHttp, serve};

mod store;
pub use store::SecretStore;

/// Answer of `GET /version`.
pub fn version() -> String {
    format!("gatekeeper v{}", env!("CARGO_PKG_VERSION"))
}
