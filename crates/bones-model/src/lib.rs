//! Shared data model for the bones control plane.
//!
//! Desired deployments submitted by clients, per-node observations produced by runtime
//! polling, the reconciliation diff, and the progress records streamed back to callers.

mod domain;
pub use domain::*;

mod error;
pub use error::ModelError;
