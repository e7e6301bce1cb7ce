use thiserror::Error;

/// Failures talking to a node's runtime daemon.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid runtime address {0}")]
    InvalidAddress(String),

    #[error("runtime {node} unreachable: {source}")]
    Unreachable {
        node: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("runtime {node} answered {status} to {action}: {body}")]
    Status {
        node: String,
        action: &'static str,
        status: u16,
        body: String,
    },

    #[error("runtime {node} sent an unreadable response: {reason}")]
    Decode { node: String, reason: String },

    #[error("runtime {node} reported: {message}")]
    Daemon { node: String, message: String },
}
