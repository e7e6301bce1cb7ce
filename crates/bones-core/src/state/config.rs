use std::time::Duration;

use crate::error::CoreError;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Delay between two polls of the same node.
    pub poll_interval: Duration,
    /// Delay between two snapshot checks while waiting for a fresh observation.
    pub freshness_check: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            freshness_check: Duration::from_secs(10),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.poll_interval.is_zero() {
            return Err(CoreError::InvalidConfig("poll_interval must be > 0".into()));
        }
        if self.freshness_check.is_zero() {
            return Err(CoreError::InvalidConfig(
                "freshness_check must be > 0".into(),
            ));
        }
        Ok(())
    }
}
