use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use bones_model::ContainerSource;

use crate::error::OrchestratorError;

/// Registry references of the images pushed through `/image`, by image name.
#[derive(Clone, Default, Debug)]
pub struct ImageCatalog {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl ImageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str, reference: &str) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(name.to_string(), reference.to_string());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(name).cloned()
    }

    /// Image reference to pull for `container`.
    ///
    /// Local sources must have been pushed under the container's name.
    pub fn resolve(
        &self,
        container: &str,
        source: &ContainerSource,
    ) -> Result<String, OrchestratorError> {
        match source {
            ContainerSource::Registry(reference) => Ok(reference.clone()),
            ContainerSource::Local(_) => self
                .get(container)
                .ok_or_else(|| OrchestratorError::ImageNotBuilt(container.to_string())),
        }
    }
}
