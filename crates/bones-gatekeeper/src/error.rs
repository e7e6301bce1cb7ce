use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

pub(crate) const PERMISSION_DENIED: &str = "Permission Denied";
pub(crate) const NOT_FOUND_OR_DENIED: &str = "No Such Item or Permission Denied";

#[derive(Debug, Error)]
pub enum GatekeeperError {
    /// Caller is not the owner, the item is missing, or it already exists (create).
    #[error("Permission Denied")]
    PermissionDenied,

    /// Missing and unreadable items look the same to the caller.
    #[error("No Such Item or Permission Denied")]
    NotFoundOrDenied,

    #[error("invalid gatekeeper address: {0}")]
    InvalidAddress(String),

    #[error("gatekeeper unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gatekeeper rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("gatekeeper server failed: {0}")]
    Server(#[from] std::io::Error),
}

impl GatekeeperError {
    /// Rebuild the error a server answered with.
    pub(crate) fn from_response(status: u16, body: &str) -> Self {
        match body.trim() {
            PERMISSION_DENIED => GatekeeperError::PermissionDenied,
            NOT_FOUND_OR_DENIED => GatekeeperError::NotFoundOrDenied,
            other => GatekeeperError::Rejected {
                status,
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for GatekeeperError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}
