use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("cluster state store is closed")]
    StoreClosed,
    #[error("invalid store config: {0}")]
    InvalidConfig(String),
}
