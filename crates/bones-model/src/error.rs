use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("malformed deployment document: {0}")]
    Malformed(String),
    #[error("Machine Provider must be specified")]
    MissingProvider,
    #[error("deployment lists no machines")]
    NoMachines,
    #[error("container name cannot be empty")]
    EmptyContainerName,
    #[error("container {0} is listed more than once")]
    DuplicateContainer(String),
    #[error("invalid progress record: {0}")]
    InvalidProgress(String),
}

impl From<serde_json::Error> for ModelError {
    fn from(e: serde_json::Error) -> Self {
        ModelError::Malformed(e.to_string())
    }
}
