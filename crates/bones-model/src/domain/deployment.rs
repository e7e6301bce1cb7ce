use std::{collections::BTreeMap, fmt, marker::PhantomData, str::FromStr};

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, Visitor},
};

use crate::error::ModelError;

const LOCAL_PREFIX: &str = "local:";
const DEFAULT_MODE: &str = "default";
const DEFAULT_GRANULARITY: &str = "deployment";

/// Where the image for a container comes from.
///
/// Decided once when the deployment document is loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContainerSource {
    /// Built from a client-side directory and pushed through the orchestrator's registry.
    Local(String),
    /// Pulled as-is from an image reference.
    Registry(String),
}

impl ContainerSource {
    fn parse(raw: &str) -> Self {
        match raw.strip_prefix(LOCAL_PREFIX) {
            Some(path) => ContainerSource::Local(path.to_string()),
            None => ContainerSource::Registry(raw.to_string()),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ContainerSource::Local(_))
    }
}

impl fmt::Display for ContainerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerSource::Local(path) => write!(f, "{LOCAL_PREFIX}{path}"),
            ContainerSource::Registry(reference) => f.write_str(reference),
        }
    }
}

impl Serialize for ContainerSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Target machines of a deployment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Machines {
    /// Machine provider name (required).
    pub provider: String,
    /// Node addresses, in the order the client listed them.
    pub ips: Vec<String>,
}

/// Desired state of a single named container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub source: ContainerSource,
    /// Parsed but not enforced by reconciliation.
    pub quantity: u32,
    /// Parsed but not enforced by reconciliation.
    pub mode: String,
    /// Parsed but not enforced by reconciliation.
    pub granularity: String,
    pub exposed_ports: Vec<String>,
}

/// Declarative target state submitted by a client.
///
/// Built only through [`DesiredDeployment::from_slice`] (or `FromStr`), which applies
/// defaults and validates the document exactly once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredDeployment {
    pub machines: Machines,
    /// Container name -> spec. Names are unique by construction.
    pub containers: BTreeMap<String, ContainerSpec>,
}

impl DesiredDeployment {
    /// Parse a JSON deployment document, applying defaults and validating it.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ModelError> {
        let raw: RawDeployment = serde_json::from_slice(bytes)?;
        Self::try_from(raw)
    }

    /// Serialize back into the JSON document form accepted by [`DesiredDeployment::from_slice`].
    pub fn to_json(&self) -> Result<String, ModelError> {
        serde_json::to_string(self).map_err(ModelError::from)
    }

    pub fn container_names(&self) -> impl Iterator<Item = &str> {
        self.containers.keys().map(String::as_str)
    }
}

impl FromStr for DesiredDeployment {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_slice(s.as_bytes())
    }
}

impl TryFrom<RawDeployment> for DesiredDeployment {
    type Error = ModelError;

    fn try_from(raw: RawDeployment) -> Result<Self, Self::Error> {
        if raw.machines.provider.trim().is_empty() {
            return Err(ModelError::MissingProvider);
        }
        let ips: Vec<String> = raw
            .machines
            .ips
            .into_iter()
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
            .collect();
        if ips.is_empty() {
            return Err(ModelError::NoMachines);
        }

        let mut containers = BTreeMap::new();
        for (name, spec) in raw.containers {
            if name.trim().is_empty() {
                return Err(ModelError::EmptyContainerName);
            }
            if containers.contains_key(&name) {
                return Err(ModelError::DuplicateContainer(name));
            }
            let source = match spec.source.as_deref().map(str::trim) {
                Some(s) if !s.is_empty() => ContainerSource::parse(s),
                _ => ContainerSource::Local(name.clone()),
            };
            let spec = ContainerSpec {
                source,
                quantity: spec.quantity,
                mode: non_empty_or(spec.mode, DEFAULT_MODE),
                granularity: non_empty_or(spec.granularity, DEFAULT_GRANULARITY),
                exposed_ports: spec.exposed_ports,
            };
            containers.insert(name, spec);
        }

        Ok(Self {
            machines: Machines {
                provider: raw.machines.provider,
                ips,
            },
            containers,
        })
    }
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

// ============================================================================
// Wire form (camelCase, plus the capitalised keys older clients send)
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawDeployment {
    #[serde(default, alias = "Machines")]
    machines: RawMachines,
    /// Kept in document order so repeated names reach validation.
    #[serde(default, alias = "Containers", deserialize_with = "map_entries")]
    containers: Vec<(String, RawContainerSpec)>,
}

fn map_entries<'de, D, V>(de: D) -> Result<Vec<(String, V)>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    struct Entries<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for Entries<V> {
        type Value = Vec<(String, V)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of container names to specs")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    de.deserialize_map(Entries(PhantomData))
}

#[derive(Debug, Default, Deserialize)]
struct RawMachines {
    #[serde(default, alias = "Provider")]
    provider: String,
    #[serde(default, alias = "Ip", alias = "ip")]
    ips: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawContainerSpec {
    #[serde(default, alias = "Source")]
    source: Option<String>,
    #[serde(default, alias = "Quantity")]
    quantity: u32,
    #[serde(default, alias = "Mode")]
    mode: Option<String>,
    #[serde(default, alias = "Granularity")]
    granularity: Option<String>,
    #[serde(default, rename = "exposedPorts", alias = "ExposedPorts")]
    exposed_ports: Vec<String>,
}
