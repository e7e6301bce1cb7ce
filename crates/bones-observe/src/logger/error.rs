use thiserror::Error;

/// Failure to set up process logging.
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("unknown log format {0:?}, use text, json or journald")]
    InvalidFormat(String),
    #[error("journald output needs linux and the `journald` feature")]
    JournaldNotSupported,
    #[error("a global logger is already installed")]
    AlreadyInitialized,
    #[error("logger setup failed: {0}")]
    InitializationFailed(String),
    #[error("bad log filter directive {0:?}")]
    InvalidLogLevel(String),
}
