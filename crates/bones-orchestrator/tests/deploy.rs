use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use bones_core::{
    ClusterStateStore, DaemonLines, PortBindings, RuntimeClient, RuntimeConnector, RuntimeError,
    StoreConfig,
};
use bones_gatekeeper::{SecretStore, one_time_item};
use bones_model::{ObservedContainer, ObservedImage, ProgressDecoder, ProgressMessage};
use bones_orchestrator::{
    DeploymentPipeline, ImageBuilder, ImageCatalog, InfraHandle, Orchestrator,
    OrchestratorClient, OrchestratorError, OrchestratorHttp, credentials::container_item, serve,
};

const ORCH_KEY: &str = "orchestrator-key";
const REGISTRY: &str = "10.0.0.1:49153";
const GATEKEEPER: &str = "10.0.0.1:49160";
const ARCHIVE_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone)]
struct Run {
    image: String,
    env: Vec<String>,
    ports: Vec<String>,
}

/// In-memory stand-in for every node's runtime daemon.
#[derive(Default)]
struct Cluster {
    containers: Mutex<HashMap<String, Vec<ObservedContainer>>>,
    runs: Mutex<HashMap<String, Vec<Run>>>,
    broken: HashSet<String>,
}

impl Cluster {
    fn with_running(self, node: &str, image: &str) -> Self {
        self.containers
            .lock()
            .unwrap()
            .entry(node.to_string())
            .or_default()
            .push(container(image));
        self
    }

    fn runs(&self, node: &str) -> Vec<Run> {
        self.runs.lock().unwrap().get(node).cloned().unwrap_or_default()
    }
}

fn container(image: &str) -> ObservedContainer {
    ObservedContainer {
        id: format!("id-{image}"),
        image: image.to_string(),
        ports: BTreeMap::new(),
    }
}

struct FakeNode {
    node: String,
    cluster: Arc<Cluster>,
}

#[async_trait]
impl RuntimeClient for FakeNode {
    fn node(&self) -> &str {
        &self.node
    }
    async fn list_containers(&self) -> Result<Vec<ObservedContainer>, RuntimeError> {
        let containers = self.cluster.containers.lock().unwrap();
        Ok(containers.get(&self.node).cloned().unwrap_or_default())
    }
    async fn list_images(&self) -> Result<Vec<ObservedImage>, RuntimeError> {
        Ok(Vec::new())
    }
    async fn build_image(
        &self,
        _: Vec<u8>,
        reference: &str,
        lines: DaemonLines,
    ) -> Result<(), RuntimeError> {
        let _ = lines.send(format!("Successfully built {reference}")).await;
        Ok(())
    }
    async fn tag_image(&self, _: &str, _: &str) -> Result<(), RuntimeError> {
        Ok(())
    }
    async fn push_image(&self, _: &str, lines: DaemonLines) -> Result<(), RuntimeError> {
        let _ = lines.send("Pushed".to_string()).await;
        Ok(())
    }
    async fn load_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.cluster.broken.contains(&self.node) {
            return Err(RuntimeError::Daemon {
                node: self.node.clone(),
                message: format!("cannot pull {image}"),
            });
        }
        Ok(())
    }
    async fn run_image(
        &self,
        image: &str,
        env: &[String],
        exposed_ports: &[String],
    ) -> Result<String, RuntimeError> {
        self.cluster
            .runs
            .lock()
            .unwrap()
            .entry(self.node.clone())
            .or_default()
            .push(Run {
                image: image.to_string(),
                env: env.to_vec(),
                ports: exposed_ports.to_vec(),
            });
        self.cluster
            .containers
            .lock()
            .unwrap()
            .entry(self.node.clone())
            .or_default()
            .push(container(image));
        Ok(format!("id-{image}"))
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

struct FakeConnector(Arc<Cluster>);

impl RuntimeConnector for FakeConnector {
    fn connect(&self, node: &str) -> Arc<dyn RuntimeClient> {
        Arc::new(FakeNode {
            node: node.to_string(),
            cluster: Arc::clone(&self.0),
        })
    }
}

fn orchestrator(cluster: Arc<Cluster>, secrets: SecretStore) -> Arc<Orchestrator> {
    let connector: Arc<dyn RuntimeConnector> = Arc::new(FakeConnector(cluster));
    let infra = InfraHandle::ready(REGISTRY, GATEKEEPER);
    let catalog = ImageCatalog::new();
    let cfg = StoreConfig {
        poll_interval: Duration::from_secs(3600),
        freshness_check: Duration::from_millis(10),
    };
    let state = ClusterStateStore::start(Arc::clone(&connector), &cfg, &CancellationToken::new());

    let pipeline = DeploymentPipeline::new(
        state,
        Arc::clone(&connector),
        Arc::new(secrets),
        infra.clone(),
        catalog.clone(),
        ORCH_KEY,
    );
    let images = ImageBuilder::new(connector.connect("10.0.0.1"), infra, catalog);
    Arc::new(Orchestrator::new(pipeline, images))
}

async fn start_server(orchestrator: Arc<Orchestrator>) -> (String, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let cancel = CancellationToken::new();
    let http = OrchestratorHttp::new(orchestrator, ARCHIVE_LIMIT);
    tokio::spawn(serve(listener, http, cancel.clone()));
    (addr, cancel)
}

async fn post_deploy(
    orchestrator: Arc<Orchestrator>,
    doc: &str,
) -> (StatusCode, Vec<ProgressMessage>) {
    let router = OrchestratorHttp::new(orchestrator, ARCHIVE_LIMIT).router();
    let req = Request::builder()
        .method("POST")
        .uri("/deploy")
        .body(Body::from(doc.to_string()))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    let status = resp.status();

    let body = to_bytes(resp.into_body(), usize::MAX);
    let bytes = tokio::time::timeout(Duration::from_secs(10), body)
        .await
        .unwrap()
        .unwrap();
    let mut decoder = ProgressDecoder::new();
    let mut msgs = decoder.feed(&bytes).unwrap();
    msgs.extend(decoder.finish().unwrap());
    (status, msgs)
}

fn env_value<'a>(run: &'a Run, name: &str) -> &'a str {
    run.env
        .iter()
        .find_map(|e| e.strip_prefix(&format!("{name}=")))
        .unwrap_or_default()
}

#[tokio::test]
async fn pushed_image_is_deployed_with_a_one_time_key() {
    let cluster = Arc::new(Cluster::default().with_running("10.0.0.5", "redis:7"));
    let secrets = SecretStore::new();
    let (addr, cancel) = start_server(orchestrator(Arc::clone(&cluster), secrets.clone())).await;
    let client = OrchestratorClient::new(&addr).unwrap();

    assert!(client.version().await.unwrap().starts_with("orchestrator v"));

    let pushed = client.push_image("web", vec![1, 2, 3]).await.unwrap();
    assert_eq!(pushed.last().map(String::as_str), Some("Built 10.0.0.1:49153/web"));

    let desired = r#"{
        "machines": { "provider": "static", "ips": ["10.0.0.5"] },
        "containers": {
            "web": { "exposedPorts": ["80"] },
            "redis": { "source": "redis:7" }
        }
    }"#
    .parse()
    .unwrap();
    let messages = client.deploy(&desired).await.unwrap();
    assert_eq!(messages.first().map(String::as_str), Some("Starting deploy"));
    assert!(messages.contains(&"To deploy: 10.0.0.5: web".to_string()));
    assert_eq!(
        messages.last().map(String::as_str),
        Some("Deploy finished: 1 deployed, 0 failed")
    );

    let runs = cluster.runs("10.0.0.5");
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.image, "10.0.0.1:49153/web");
    assert_eq!(run.ports, vec!["80"]);
    assert_eq!(env_value(run, "GATEKEEPER"), GATEKEEPER);

    let one_time = env_value(run, "GATEKEEPER_KEY");
    let container_key = secrets
        .get(&container_item("10.0.0.5", "web"), ORCH_KEY)
        .unwrap();
    assert_ne!(one_time, container_key);
    assert_eq!(secrets.get(&one_time_item(one_time), "").unwrap(), container_key);

    // Everything is running now; the re-registered node is polled again before diffing.
    let messages = client.deploy(&desired).await.unwrap();
    assert!(messages.contains(&"Nothing to deploy".to_string()));
    assert_eq!(cluster.runs("10.0.0.5").len(), 1);

    cancel.cancel();
}

#[tokio::test]
async fn one_bad_node_does_not_block_the_others() {
    let cluster = Arc::new(Cluster {
        broken: HashSet::from(["10.0.0.6".to_string()]),
        ..Cluster::default()
    });
    let doc = r#"{
        "machines": { "provider": "static", "ips": ["10.0.0.5", "10.0.0.6"] },
        "containers": { "cache": { "source": "redis:7" } }
    }"#;

    let orchestrator = orchestrator(Arc::clone(&cluster), SecretStore::new());
    let (status, msgs) = post_deploy(orchestrator, doc).await;

    assert_eq!(status, StatusCode::OK);
    let errors: Vec<&ProgressMessage> = msgs.iter().filter(|m| m.is_error()).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].status.as_deref(), Some("500"));
    assert!(errors[0].message.starts_with("cache on 10.0.0.6"));
    assert_eq!(
        msgs.last().map(|m| m.message.as_str()),
        Some("Deploy finished: 1 deployed, 1 failed")
    );
    assert_eq!(cluster.runs("10.0.0.5").len(), 1);
    assert!(cluster.runs("10.0.0.6").is_empty());
}

#[tokio::test]
async fn local_container_without_pushed_image_is_reported() {
    let cluster = Arc::new(Cluster::default());
    let doc = r#"{
        "Machines": { "Provider": "static", "Ip": ["10.0.0.5"] },
        "Containers": { "web": { "Quantity": 1 } }
    }"#;

    let orchestrator = orchestrator(Arc::clone(&cluster), SecretStore::new());
    let (status, msgs) = post_deploy(orchestrator, doc).await;

    assert_eq!(status, StatusCode::OK);
    let error = msgs.iter().find(|m| m.is_error()).unwrap();
    assert!(error.message.contains("no image pushed for web"));
    assert!(cluster.runs("10.0.0.5").is_empty());
}

#[tokio::test]
async fn invalid_documents_are_refused_upfront() {
    for doc in [
        "{ not json",
        r#"{ "machines": { "ips": ["10.0.0.5"] }, "containers": {} }"#,
    ] {
        let cluster = Arc::new(Cluster::default());
        let (status, msgs) = post_deploy(orchestrator(cluster, SecretStore::new()), doc).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].is_error());
        assert_eq!(msgs[0].status.as_deref(), Some("400"));
    }
}

#[tokio::test]
async fn client_surfaces_refusals() {
    let orchestrator = orchestrator(Arc::new(Cluster::default()), SecretStore::new());
    let (addr, cancel) = start_server(orchestrator).await;
    let client = OrchestratorClient::new(&addr).unwrap();

    let err = client.push_image("bad/name", Vec::new()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Remote { status, .. } if status == "400"));

    cancel.cancel();
}

#[tokio::test]
async fn later_deploys_reach_nodes_registered_earlier() {
    let cluster = Arc::new(Cluster::default());
    let orchestrator = orchestrator(Arc::clone(&cluster), SecretStore::new());

    let first = r#"{
        "machines": { "provider": "static", "ips": ["10.0.0.7"] },
        "containers": { "cache": { "source": "redis:7" } }
    }"#;
    let (status, _) = post_deploy(Arc::clone(&orchestrator), first).await;
    assert_eq!(status, StatusCode::OK);

    let second = r#"{
        "machines": { "provider": "static", "ips": ["10.0.0.5"] },
        "containers": { "api": { "source": "nginx:1" } }
    }"#;
    let (status, msgs) = post_deploy(orchestrator, second).await;
    assert_eq!(status, StatusCode::OK);
    assert!(msgs.iter().all(|m| !m.is_error()));
    assert!(msgs.iter().any(|m| m.message == "To deploy: 10.0.0.5: api; 10.0.0.7: api"));

    let images = |node: &str| -> Vec<String> {
        cluster.runs(node).into_iter().map(|r| r.image).collect()
    };
    assert_eq!(images("10.0.0.5"), vec!["nginx:1"]);
    assert_eq!(images("10.0.0.7"), vec!["redis:7", "nginx:1"]);
}
