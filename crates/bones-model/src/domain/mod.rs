mod deployment;
pub use deployment::{ContainerSource, ContainerSpec, DesiredDeployment, Machines};

mod observation;
pub use observation::{NodeObservation, ObservedContainer, ObservedImage, repository_name};

mod progress;
pub use progress::{MessageType, ProgressDecoder, ProgressMessage};

use std::collections::BTreeMap;

/// Node address (IP) of a machine running a container-runtime daemon.
pub type NodeAddr = String;

/// Consistent snapshot of every registered node's latest observation.
pub type ClusterState = BTreeMap<NodeAddr, NodeObservation>;

/// Containers that must be launched, keyed by the node they are missing from.
///
/// Derived on every reconciliation pass and never persisted.
pub type DeploymentDiff = BTreeMap<NodeAddr, Vec<String>>;
