use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::OffsetTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::logger::{config::LoggerConfig, error::LoggerError, format::LoggerFormat};

/// HTTP plumbing that is chatty at debug; held at warn unless the directive names it.
const QUIET_TARGETS: &[&str] = &["hyper_util", "hyper", "reqwest", "h2"];

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Build the output layer for `cfg`, attach the level filter and install it globally.
pub(super) fn install(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let filter = directives(cfg.level.as_str())?;
    let output = output_layer(cfg)?.with_filter(filter);

    tracing_subscriber::registry()
        .with(output)
        .try_init()
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("global default") || msg.contains("already") {
                LoggerError::AlreadyInitialized
            } else {
                LoggerError::InitializationFailed(msg)
            }
        })
}

fn output_layer(cfg: &LoggerConfig) -> Result<BoxedLayer, LoggerError> {
    let layer = match cfg.format {
        LoggerFormat::Text => fmt::layer()
            .with_ansi(cfg.use_color)
            .with_target(cfg.with_targets)
            .with_timer(timer())
            .boxed(),
        LoggerFormat::Json => fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(cfg.with_targets)
            .with_current_span(true)
            .with_timer(timer())
            .boxed(),
        LoggerFormat::Journald => journald_layer()?,
    };
    Ok(layer)
}

/// Local offset when the platform can report it, UTC otherwise.
fn timer() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

fn directives(level: &str) -> Result<EnvFilter, LoggerError> {
    let mut spec = level.to_string();
    for target in QUIET_TARGETS {
        if !level.contains(target) {
            spec.push_str(&format!(",{target}=warn"));
        }
    }
    EnvFilter::try_new(&spec).map_err(|_| LoggerError::InvalidLogLevel(level.to_string()))
}

#[cfg(all(target_os = "linux", feature = "journald"))]
fn journald_layer() -> Result<BoxedLayer, LoggerError> {
    let layer = tracing_journald::layer()
        .map_err(|e| LoggerError::InitializationFailed(format!("journald: {e}")))?;
    Ok(layer.boxed())
}

#[cfg(not(all(target_os = "linux", feature = "journald")))]
fn journald_layer() -> Result<BoxedLayer, LoggerError> {
    Err(LoggerError::JournaldNotSupported)
}
