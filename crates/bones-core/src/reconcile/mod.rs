//! Desired-versus-observed diffing.

use bones_model::{ClusterState, DeploymentDiff, DesiredDeployment};

/// Containers to launch, per node.
///
/// For every desired container and every observed node, the container is due on that node
/// unless one of the node's containers runs an image of the same repository. The diff is
/// additive only: nothing is ever scheduled for removal, and quantity, mode and granularity
/// are not taken into account.
pub fn compute_diff(desired: &DesiredDeployment, observed: &ClusterState) -> DeploymentDiff {
    let mut diff = DeploymentDiff::new();
    for name in desired.container_names() {
        for (node, observation) in observed {
            if !observation.runs_repository(name) {
                diff.entry(node.clone()).or_default().push(name.to_string());
            }
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use bones_model::{NodeObservation, ObservedContainer};
    use std::collections::BTreeMap;

    fn desired(names: &[&str]) -> DesiredDeployment {
        let containers: Vec<String> = names.iter().map(|n| format!("\"{n}\": {{}}")).collect();
        format!(
            r#"{{ "machines": {{ "provider": "static", "ips": ["10.0.0.1"] }},
                 "containers": {{ {} }} }}"#,
            containers.join(",")
        )
        .parse()
        .unwrap()
    }

    fn node(addr: &str, images: &[&str]) -> (String, NodeObservation) {
        let containers = images
            .iter()
            .enumerate()
            .map(|(i, image)| ObservedContainer {
                id: format!("c{i}"),
                image: image.to_string(),
                ports: BTreeMap::new(),
            })
            .collect();
        (
            addr.to_string(),
            NodeObservation {
                containers,
                ..NodeObservation::empty(addr)
            },
        )
    }

    fn state(nodes: Vec<(String, NodeObservation)>) -> ClusterState {
        nodes.into_iter().collect()
    }

    #[test]
    fn empty_node_gets_everything() {
        let diff = compute_diff(
            &desired(&["web", "db"]),
            &state(vec![node("10.0.0.5", &[])]),
        );
        assert_eq!(diff["10.0.0.5"], vec!["db".to_string(), "web".to_string()]);
    }

    #[test]
    fn running_everywhere_means_empty_diff() {
        let cases: Vec<(Vec<&str>, ClusterState)> = vec![
            (vec![], state(vec![node("10.0.0.1", &[])])),
            (vec!["web"], state(vec![])),
            (
                vec!["web"],
                state(vec![node("10.0.0.1", &["10.0.0.9:5000/web:17"])]),
            ),
            (
                vec!["web", "redis"],
                state(vec![
                    node("10.0.0.1", &["web:latest", "redis:7"]),
                    node("10.0.0.2", &["redis", "10.0.0.9:5000/web"]),
                ]),
            ),
        ];
        for (names, observed) in cases {
            let diff = compute_diff(&desired(&names), &observed);
            assert!(diff.is_empty(), "names {names:?} produced {diff:?}");
        }
    }

    #[test]
    fn diff_stays_within_known_nodes_and_names() {
        let names = ["web", "db", "cache"];
        let observed = state(vec![
            node("10.0.0.1", &["web:1"]),
            node("10.0.0.2", &["db:2", "other:3"]),
            node("10.0.0.3", &[]),
        ]);

        let diff = compute_diff(&desired(&names), &observed);

        for (addr, missing) in &diff {
            assert!(observed.contains_key(addr));
            assert!(!missing.is_empty());
            for name in missing {
                assert!(names.contains(&name.as_str()));
                assert!(!observed[addr].runs_repository(name));
            }
        }
        assert_eq!(diff["10.0.0.1"], vec!["cache".to_string(), "db".to_string()]);
        assert_eq!(diff["10.0.0.2"], vec!["cache".to_string(), "web".to_string()]);
        assert_eq!(diff["10.0.0.3"].len(), 3);
    }

    #[test]
    fn extra_containers_are_never_removed() {
        let diff = compute_diff(
            &desired(&["web"]),
            &state(vec![node("10.0.0.1", &["web:1", "legacy:0", "cron:2"])]),
        );
        assert!(diff.is_empty());
    }
}
