use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

/// A container seen running on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedContainer {
    pub id: String,
    /// Image reference the container was created from (e.g. `10.0.0.1:5000/web:latest`).
    pub image: String,
    /// Container port (e.g. `80/tcp`) -> published host port.
    #[serde(default)]
    pub ports: BTreeMap<String, String>,
}

impl ObservedContainer {
    /// Repository component of the image reference, see [`repository_name`].
    pub fn repository(&self) -> &str {
        repository_name(&self.image)
    }
}

/// An image present on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedImage {
    pub id: String,
    #[serde(default)]
    pub repo_tags: Vec<String>,
}

/// Point-in-time view of one node.
///
/// Never mutated after construction; each poll replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeObservation {
    pub node: String,
    pub containers: Vec<ObservedContainer>,
    pub images: Vec<ObservedImage>,
    /// When the node was last polled successfully (`UNIX_EPOCH` = never).
    #[serde(with = "time_serde")]
    pub last_updated: SystemTime,
}

impl NodeObservation {
    /// Placeholder for a node that has been registered but not polled yet.
    pub fn empty(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            containers: Vec::new(),
            images: Vec::new(),
            last_updated: UNIX_EPOCH,
        }
    }

    pub fn is_fresher_than(&self, since: SystemTime) -> bool {
        self.last_updated > since
    }

    /// Whether any container on the node runs an image of the given repository.
    pub fn runs_repository(&self, repository: &str) -> bool {
        self.containers.iter().any(|c| c.repository() == repository)
    }
}

/// Repository component of an image reference.
///
/// A registry prefix (everything up to the first `/`) is dropped, then the tag
/// (everything from the first `:`):
/// - `web:latest` -> `web`
/// - `10.0.0.1:5000/web:1700000000` -> `web`
/// - `library/nginx` -> `nginx`
pub fn repository_name(image: &str) -> &str {
    let name = match image.split_once('/') {
        Some((_, rest)) => rest,
        None => image,
    };
    match name.split_once(':') {
        Some((repo, _)) => repo,
        None => name,
    }
}

mod time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?;
        since_epoch.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + std::time::Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn container(image: &str) -> ObservedContainer {
        ObservedContainer {
            id: "c1".into(),
            image: image.into(),
            ports: BTreeMap::new(),
        }
    }

    #[test]
    fn repository_name_strips_registry_and_tag() {
        assert_eq!(repository_name("web"), "web");
        assert_eq!(repository_name("web:latest"), "web");
        assert_eq!(repository_name("10.0.0.1:5000/web:1700000000"), "web");
        assert_eq!(repository_name("10.0.0.1:5000/web"), "web");
        assert_eq!(repository_name("library/nginx:1.25"), "nginx");
    }

    #[test]
    fn empty_observation_is_never_fresh() {
        let obs = NodeObservation::empty("10.0.0.1");
        assert!(!obs.is_fresher_than(UNIX_EPOCH));
        assert!(obs.containers.is_empty());
    }

    #[test]
    fn freshness_is_strictly_after() {
        let at = UNIX_EPOCH + Duration::from_secs(100);
        let obs = NodeObservation {
            last_updated: at,
            ..NodeObservation::empty("10.0.0.1")
        };
        assert!(obs.is_fresher_than(at - Duration::from_secs(1)));
        assert!(!obs.is_fresher_than(at));
    }

    #[test]
    fn runs_repository_matches_by_name() {
        let obs = NodeObservation {
            containers: vec![container("10.0.0.1:5000/web:1"), container("redis:7")],
            ..NodeObservation::empty("10.0.0.1")
        };
        assert!(obs.runs_repository("web"));
        assert!(obs.runs_repository("redis"));
        assert!(!obs.runs_repository("db"));
    }
}
