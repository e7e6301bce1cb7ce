//! Cluster state tracking.
//!
//! One actor task owns the node map. Every read and write goes through its queue, so a
//! snapshot always reflects a state that existed at some instant. Each registered node gets
//! its own poller task that replaces the node's observation wholesale.

mod actor;
mod config;
mod poller;

pub use config::StoreConfig;

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use bones_model::ClusterState;

use crate::{error::CoreError, runtime::RuntimeConnector};
use actor::{StoreActor, StoreRequest};

const STORE_QUEUE: usize = 64;

/// Handle to the cluster state actor. Cheap to clone.
///
/// The actor stops once every handle is dropped or `cancel` fires.
#[derive(Clone)]
pub struct ClusterStateStore {
    tx: mpsc::Sender<StoreRequest>,
    freshness_check: Duration,
}

impl ClusterStateStore {
    /// Spawn the actor on the current tokio runtime.
    pub fn start(
        connector: Arc<dyn RuntimeConnector>,
        cfg: &StoreConfig,
        cancel: &CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(STORE_QUEUE);
        let actor = StoreActor::new(
            rx,
            tx.downgrade(),
            connector,
            cfg.poll_interval,
            cancel.child_token(),
        );
        tokio::spawn(actor.run());

        Self {
            tx,
            freshness_check: cfg.freshness_check,
        }
    }

    /// Start tracking `node`. Idempotent.
    ///
    /// Returns `true` when the node was not tracked before. Registering a tracked node
    /// asks its poller to poll right away.
    pub async fn add_node(&self, node: &str) -> Result<bool, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.request(StoreRequest::Register {
            node: node.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| CoreError::StoreClosed)
    }

    /// Copy of the whole cluster state.
    pub async fn snapshot(&self) -> Result<ClusterState, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.request(StoreRequest::Snapshot { reply }).await?;
        rx.await.map_err(|_| CoreError::StoreClosed)
    }

    /// Block until at least one node has been observed after `since`.
    ///
    /// Waits for *any* node, not all of them: slower nodes may still be stale when this returns.
    pub async fn wait_for_freshness(&self, since: SystemTime) -> Result<(), CoreError> {
        loop {
            let state = self.snapshot().await?;
            if state.values().any(|obs| obs.is_fresher_than(since)) {
                return Ok(());
            }
            debug!(nodes = state.len(), "waiting for a fresh node observation");
            tokio::time::sleep(self.freshness_check).await;
        }
    }

    async fn request(&self, req: StoreRequest) -> Result<(), CoreError> {
        self.tx.send(req).await.map_err(|_| CoreError::StoreClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compute_diff,
        runtime::{DaemonLines, PortBindings, RuntimeClient, RuntimeError},
    };
    use async_trait::async_trait;
    use bones_model::{DesiredDeployment, ObservedContainer, ObservedImage};
    use std::{
        collections::{BTreeMap, HashMap},
        sync::atomic::{AtomicUsize, Ordering},
    };
    use tokio::task::JoinSet;

    struct FakeRuntime {
        node: String,
        containers: Vec<ObservedContainer>,
        polls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl RuntimeClient for FakeRuntime {
        fn node(&self) -> &str {
            &self.node
        }
        async fn list_containers(&self) -> Result<Vec<ObservedContainer>, RuntimeError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RuntimeError::InvalidAddress(self.node.clone()));
            }
            Ok(self.containers.clone())
        }
        async fn list_images(&self) -> Result<Vec<ObservedImage>, RuntimeError> {
            Ok(Vec::new())
        }
        async fn build_image(
            &self,
            _: Vec<u8>,
            _: &str,
            _: DaemonLines,
        ) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn tag_image(&self, _: &str, _: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn push_image(&self, _: &str, _: DaemonLines) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn load_image(&self, _: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn run_image(
            &self,
            _: &str,
            _: &[String],
            _: &[String],
        ) -> Result<String, RuntimeError> {
            Ok("c1".into())
        }
        async fn stop_container(&self, _: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn delete_container(&self, _: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn inspect_container(&self, _: &str) -> Result<PortBindings, RuntimeError> {
            Ok(PortBindings::new())
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        connects: AtomicUsize,
        polls: Arc<AtomicUsize>,
        containers: HashMap<String, Vec<ObservedContainer>>,
        failing: Vec<String>,
    }

    impl RuntimeConnector for FakeConnector {
        fn connect(&self, node: &str) -> Arc<dyn RuntimeClient> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Arc::new(FakeRuntime {
                node: node.to_string(),
                containers: self.containers.get(node).cloned().unwrap_or_default(),
                polls: Arc::clone(&self.polls),
                fail: self.failing.iter().any(|n| n == node),
            })
        }
    }

    fn fast_cfg() -> StoreConfig {
        StoreConfig {
            poll_interval: Duration::from_secs(3600),
            freshness_check: Duration::from_millis(10),
        }
    }

    fn container(image: &str) -> ObservedContainer {
        ObservedContainer {
            id: "c1".into(),
            image: image.into(),
            ports: BTreeMap::new(),
        }
    }

    #[test]
    fn config_validation() {
        assert!(StoreConfig::default().validate().is_ok());
        let bad = StoreConfig {
            poll_interval: Duration::ZERO,
            ..StoreConfig::default()
        };
        assert!(matches!(bad.validate(), Err(CoreError::InvalidConfig(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_add_node_spawns_one_poller() {
        let connector = Arc::new(FakeConnector::default());
        let store =
            ClusterStateStore::start(connector.clone(), &fast_cfg(), &CancellationToken::new());

        let mut set = JoinSet::new();
        for _ in 0..16 {
            let store = store.clone();
            set.spawn(async move { store.add_node("10.0.0.1").await.unwrap() });
        }
        let mut added = 0;
        while let Some(res) = set.join_next().await {
            if res.unwrap() {
                added += 1;
            }
        }

        assert_eq!(added, 1);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        let state = store.snapshot().await.unwrap();
        assert_eq!(state.len(), 1);
        assert!(state.contains_key("10.0.0.1"));
    }

    #[tokio::test]
    async fn registered_node_starts_empty_then_becomes_fresh() {
        let mut containers = HashMap::new();
        containers.insert("10.0.0.1".to_string(), vec![container("redis:7")]);
        let connector = Arc::new(FakeConnector {
            containers,
            ..FakeConnector::default()
        });
        let store = ClusterStateStore::start(connector, &fast_cfg(), &CancellationToken::new());

        let since = SystemTime::now() - Duration::from_secs(1);
        store.add_node("10.0.0.1").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), store.wait_for_freshness(since))
            .await
            .unwrap()
            .unwrap();

        let state = store.snapshot().await.unwrap();
        let obs = &state["10.0.0.1"];
        assert!(obs.is_fresher_than(since));
        assert!(obs.runs_repository("redis"));
    }

    #[tokio::test]
    async fn failing_node_never_becomes_fresh() {
        let connector = Arc::new(FakeConnector {
            failing: vec!["10.0.0.9".into()],
            ..FakeConnector::default()
        });
        let store =
            ClusterStateStore::start(connector.clone(), &fast_cfg(), &CancellationToken::new());

        let since = SystemTime::now() - Duration::from_secs(1);
        store.add_node("10.0.0.9").await.unwrap();
        let waited =
            tokio::time::timeout(Duration::from_millis(100), store.wait_for_freshness(since)).await;

        assert!(waited.is_err());
        assert!(connector.polls.load(Ordering::SeqCst) >= 1);
        let state = store.snapshot().await.unwrap();
        assert!(!state["10.0.0.9"].is_fresher_than(since));
    }

    #[tokio::test]
    async fn one_fresh_node_is_enough_to_stop_waiting() {
        let connector = Arc::new(FakeConnector {
            failing: vec!["10.0.0.9".into()],
            ..FakeConnector::default()
        });
        let store =
            ClusterStateStore::start(connector.clone(), &fast_cfg(), &CancellationToken::new());

        let since = SystemTime::now() - Duration::from_secs(1);
        store.add_node("10.0.0.9").await.unwrap();
        store.add_node("10.0.0.1").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), store.wait_for_freshness(since))
            .await
            .unwrap()
            .unwrap();

        let state = store.snapshot().await.unwrap();
        assert_eq!(state.len(), 2);
        assert!(state["10.0.0.1"].is_fresher_than(since));
        assert!(!state["10.0.0.9"].is_fresher_than(since));
    }

    #[tokio::test]
    async fn re_adding_a_node_triggers_an_early_poll() {
        let connector = Arc::new(FakeConnector::default());
        let store =
            ClusterStateStore::start(connector.clone(), &fast_cfg(), &CancellationToken::new());

        let since = SystemTime::now() - Duration::from_secs(1);
        assert!(store.add_node("10.0.0.1").await.unwrap());
        tokio::time::timeout(Duration::from_secs(5), store.wait_for_freshness(since))
            .await
            .unwrap()
            .unwrap();
        assert!(!store.add_node("10.0.0.1").await.unwrap());

        tokio::time::timeout(Duration::from_secs(5), async {
            while connector.polls.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_store_reports_closed() {
        let cancel = CancellationToken::new();
        let store =
            ClusterStateStore::start(Arc::new(FakeConnector::default()), &fast_cfg(), &cancel);
        store.add_node("10.0.0.1").await.unwrap();

        cancel.cancel();
        let err = store.snapshot().await.unwrap_err();
        assert!(matches!(err, CoreError::StoreClosed));
    }

    #[tokio::test]
    async fn fresh_empty_node_needs_every_container() {
        let store = ClusterStateStore::start(
            Arc::new(FakeConnector::default()),
            &fast_cfg(),
            &CancellationToken::new(),
        );
        let desired: DesiredDeployment = r#"{
            "machines": { "provider": "static", "ips": ["10.0.0.5"] },
            "containers": { "web": {} }
        }"#
        .parse()
        .unwrap();

        let since = SystemTime::now() - Duration::from_secs(1);
        store.add_node("10.0.0.5").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), store.wait_for_freshness(since))
            .await
            .unwrap()
            .unwrap();

        let diff = compute_diff(&desired, &store.snapshot().await.unwrap());
        assert_eq!(diff.len(), 1);
        assert_eq!(diff["10.0.0.5"], vec!["web".to_string()]);
    }
}
