use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use bones_model::{ObservedContainer, ObservedImage};

use super::{DaemonLines, PortBindings, RuntimeClient, RuntimeConnector, RuntimeError, port_key};

/// Port the Docker Remote API listens on for every node.
pub const DEFAULT_RUNTIME_PORT: u16 = 4243;

/// Base64 of `{}`: anonymous registry credentials.
const ANONYMOUS_AUTH: &str = "e30=";

/// Docker Remote API client for one node.
#[derive(Clone, Debug)]
pub struct DockerClient {
    node: String,
    base: String,
    http: reqwest::Client,
}

impl DockerClient {
    pub fn new(node: impl Into<String>, port: u16) -> Self {
        Self::with_client(reqwest::Client::new(), node, port)
    }

    pub fn with_client(http: reqwest::Client, node: impl Into<String>, port: u16) -> Self {
        let node = node.into();
        let base = format!("http://{node}:{port}");
        Self { node, base, http }
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, RuntimeError> {
        let mut url = Url::parse(&format!("{}{}", self.base, path))
            .map_err(|_| RuntimeError::InvalidAddress(self.base.clone()))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn raw(&self, req: RequestBuilder) -> Result<(StatusCode, String), RuntimeError> {
        let resp = req.send().await.map_err(|e| self.unreachable(e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.unreachable(e))?;
        Ok((status, body))
    }

    /// Send and require a 2xx answer.
    async fn send(
        &self,
        action: &'static str,
        req: RequestBuilder,
    ) -> Result<String, RuntimeError> {
        let (status, body) = self.raw(req).await?;
        if !status.is_success() {
            return Err(self.status(action, status, body));
        }
        Ok(body)
    }

    /// Send and accept 2xx or 304 (already in the requested state).
    async fn send_idempotent(
        &self,
        action: &'static str,
        req: RequestBuilder,
    ) -> Result<(), RuntimeError> {
        let (status, body) = self.raw(req).await?;
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(());
        }
        Err(self.status(action, status, body))
    }

    /// Send, require a 2xx answer, then forward the streamed records as each chunk arrives.
    async fn stream(
        &self,
        action: &'static str,
        req: RequestBuilder,
        lines: &DaemonLines,
    ) -> Result<(), RuntimeError> {
        let mut resp = req.send().await.map_err(|e| self.unreachable(e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.map_err(|e| self.unreachable(e))?;
            return Err(self.status(action, status, body));
        }

        let mut records = DaemonRecords::new(&self.node);
        while let Some(chunk) = resp.chunk().await.map_err(|e| self.unreachable(e))? {
            for line in records.feed(&chunk)? {
                if lines.send(line).await.is_err() {
                    debug!(node = %self.node, action, "progress receiver gone");
                }
            }
        }
        records.finish()
    }

    fn unreachable(&self, source: reqwest::Error) -> RuntimeError {
        RuntimeError::Unreachable {
            node: self.node.clone(),
            source,
        }
    }

    fn status(&self, action: &'static str, status: StatusCode, body: String) -> RuntimeError {
        RuntimeError::Status {
            node: self.node.clone(),
            action,
            status: status.as_u16(),
            body: body.trim().to_string(),
        }
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self, body: &str) -> Result<T, RuntimeError> {
        serde_json::from_str(body).map_err(|e| RuntimeError::Decode {
            node: self.node.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl RuntimeClient for DockerClient {
    fn node(&self) -> &str {
        &self.node
    }

    async fn list_containers(&self) -> Result<Vec<ObservedContainer>, RuntimeError> {
        let url = self.url("/containers/json", &[])?;
        let body = self.send("list containers", self.http.get(url)).await?;
        let containers: Vec<ContainerSummary> = self.decode(&body)?;
        Ok(containers.into_iter().map(ObservedContainer::from).collect())
    }

    async fn list_images(&self) -> Result<Vec<ObservedImage>, RuntimeError> {
        let url = self.url("/images/json", &[])?;
        let body = self.send("list images", self.http.get(url)).await?;
        let images: Vec<ImageSummary> = self.decode(&body)?;
        Ok(images.into_iter().map(ObservedImage::from).collect())
    }

    async fn build_image(
        &self,
        archive: Vec<u8>,
        reference: &str,
        lines: DaemonLines,
    ) -> Result<(), RuntimeError> {
        let url = self.url("/build", &[("t", reference), ("rm", "1")])?;
        let req = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-tar")
            .body(archive);
        self.stream("build image", req, &lines).await
    }

    async fn tag_image(&self, image: &str, repo: &str) -> Result<(), RuntimeError> {
        let url = self.url(
            &format!("/images/{image}/tag"),
            &[("repo", repo), ("force", "1")],
        )?;
        self.send("tag image", self.http.post(url)).await?;
        debug!(node = %self.node, image, repo, "image tagged");
        Ok(())
    }

    async fn push_image(&self, image: &str, lines: DaemonLines) -> Result<(), RuntimeError> {
        let url = self.url(&format!("/images/{image}/push"), &[])?;
        let req = self.http.post(url).header("X-Registry-Auth", ANONYMOUS_AUTH);
        self.stream("push image", req, &lines).await
    }

    async fn load_image(&self, image: &str) -> Result<(), RuntimeError> {
        let url = self.url("/images/create", &[("fromImage", image)])?;
        let req = self.http.post(url).header("X-Registry-Auth", ANONYMOUS_AUTH);
        let body = self.send("pull image", req).await?;
        daemon_lines(&self.node, &body)?;
        Ok(())
    }

    async fn run_image(
        &self,
        image: &str,
        env: &[String],
        exposed_ports: &[String],
    ) -> Result<String, RuntimeError> {
        let ports: Vec<String> = exposed_ports.iter().map(|p| port_key(p)).collect();
        let exposed: serde_json::Map<String, serde_json::Value> =
            ports.iter().map(|p| (p.clone(), json!({}))).collect();
        let bindings: serde_json::Map<String, serde_json::Value> = ports
            .iter()
            .map(|p| (p.clone(), json!([{ "HostPort": "" }])))
            .collect();
        let spec = json!({
            "Image": image,
            "Env": env,
            "ExposedPorts": exposed,
            "HostConfig": { "PortBindings": bindings },
        });

        let url = self.url("/containers/create", &[])?;
        let body = self.send("create container", self.http.post(url).json(&spec)).await?;
        let created: CreateResponse = self.decode(&body)?;

        let url = self.url(&format!("/containers/{}/start", created.id), &[])?;
        self.send_idempotent("start container", self.http.post(url)).await?;
        Ok(created.id)
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        let url = self.url(&format!("/containers/{id}/stop"), &[("t", "1")])?;
        self.send_idempotent("stop container", self.http.post(url)).await
    }

    async fn delete_container(&self, id: &str) -> Result<(), RuntimeError> {
        let url = self.url(&format!("/containers/{id}"), &[])?;
        self.send("delete container", self.http.delete(url)).await?;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<PortBindings, RuntimeError> {
        let url = self.url(&format!("/containers/{id}/json"), &[])?;
        let body = self.send("inspect container", self.http.get(url)).await?;
        let inspected: InspectResponse = self.decode(&body)?;
        Ok(inspected.port_bindings())
    }
}

/// Hands out [`DockerClient`]s sharing one connection pool.
#[derive(Clone, Debug)]
pub struct DockerConnector {
    port: u16,
    http: reqwest::Client,
}

impl DockerConnector {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            http: reqwest::Client::new(),
        }
    }
}

impl Default for DockerConnector {
    fn default() -> Self {
        Self::new(DEFAULT_RUNTIME_PORT)
    }
}

impl RuntimeConnector for DockerConnector {
    fn connect(&self, node: &str) -> Arc<dyn RuntimeClient> {
        Arc::new(DockerClient::with_client(self.http.clone(), node, self.port))
    }
}

// ============================================================================
// Daemon wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSummary {
    id: String,
    image: String,
    #[serde(default)]
    ports: Vec<PortSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortSummary {
    private_port: u16,
    #[serde(default)]
    public_port: Option<u16>,
    #[serde(default, rename = "Type")]
    kind: String,
}

impl From<ContainerSummary> for ObservedContainer {
    fn from(c: ContainerSummary) -> Self {
        let ports = c
            .ports
            .into_iter()
            .filter_map(|p| {
                let public = p.public_port?;
                let kind = if p.kind.is_empty() { "tcp" } else { p.kind.as_str() };
                Some((format!("{}/{}", p.private_port, kind), public.to_string()))
            })
            .collect();
        ObservedContainer {
            id: c.id,
            image: c.image,
            ports,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageSummary {
    id: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
}

impl From<ImageSummary> for ObservedImage {
    fn from(i: ImageSummary) -> Self {
        ObservedImage {
            id: i.id,
            repo_tags: i.repo_tags.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectResponse {
    network_settings: NetworkSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkSettings {
    #[serde(default)]
    ports: Option<BTreeMap<String, Option<Vec<HostBinding>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostBinding {
    #[serde(default)]
    host_port: String,
}

impl InspectResponse {
    fn port_bindings(self) -> PortBindings {
        self.network_settings
            .ports
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(port, bindings)| {
                let host = bindings?
                    .into_iter()
                    .map(|b| b.host_port)
                    .find(|p| !p.is_empty())?;
                Some((port, host))
            })
            .collect()
    }
}

/// One record of a streamed build/push/pull answer.
#[derive(Debug, Deserialize)]
struct DaemonLine {
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Incremental decoder of a streamed daemon answer.
///
/// Records are concatenated JSON objects that may be split across chunks at any byte. The
/// first error record fails the whole answer.
struct DaemonRecords<'a> {
    node: &'a str,
    buf: Vec<u8>,
}

impl<'a> DaemonRecords<'a> {
    fn new(node: &'a str) -> Self {
        Self {
            node,
            buf: Vec::new(),
        }
    }

    /// Feed the next chunk and return the progress text of every record it completes.
    fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, RuntimeError> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        let consumed = {
            let mut records =
                serde_json::Deserializer::from_slice(&self.buf).into_iter::<DaemonLine>();
            loop {
                match records.next() {
                    Some(Ok(record)) => {
                        if let Some(text) = self.text(record)? {
                            out.push(text);
                        }
                    }
                    Some(Err(e)) if e.is_eof() => break records.byte_offset(),
                    Some(Err(e)) => return Err(self.decode_error(e.to_string())),
                    None => break records.byte_offset(),
                }
            }
        };
        self.buf.drain(..consumed);
        Ok(out)
    }

    /// The answer has ended; anything left over is a truncated record.
    fn finish(self) -> Result<(), RuntimeError> {
        if self.buf.trim_ascii().is_empty() {
            Ok(())
        } else {
            Err(self.decode_error("daemon output ends inside a record".to_string()))
        }
    }

    fn text(&self, record: DaemonLine) -> Result<Option<String>, RuntimeError> {
        if let Some(message) = record.error {
            return Err(RuntimeError::Daemon {
                node: self.node.to_string(),
                message,
            });
        }
        let text = record.stream.or(record.status).unwrap_or_default();
        let text = text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }

    fn decode_error(&self, reason: String) -> RuntimeError {
        RuntimeError::Decode {
            node: self.node.to_string(),
            reason,
        }
    }
}

/// Collect the progress text of a complete daemon answer.
fn daemon_lines(node: &str, body: &str) -> Result<Vec<String>, RuntimeError> {
    let mut records = DaemonRecords::new(node);
    let out = records.feed(body.as_bytes())?;
    records.finish()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_summary_keeps_published_ports_only() {
        let body = r#"[{
            "Id": "abc",
            "Image": "10.0.0.1:5000/web:1700000000",
            "Ports": [
                { "PrivatePort": 80, "PublicPort": 49153, "Type": "tcp" },
                { "PrivatePort": 443, "Type": "tcp" }
            ]
        }]"#;
        let parsed: Vec<ContainerSummary> = serde_json::from_str(body).unwrap();
        let c = ObservedContainer::from(parsed.into_iter().next().unwrap());

        assert_eq!(c.id, "abc");
        assert_eq!(c.repository(), "web");
        assert_eq!(c.ports.len(), 1);
        assert_eq!(c.ports["80/tcp"], "49153");
    }

    #[test]
    fn image_summary_tolerates_null_tags() {
        let body = r#"[
            { "Id": "sha256:1", "RepoTags": null },
            { "Id": "sha256:2", "RepoTags": ["web:latest"] }
        ]"#;
        let parsed: Vec<ImageSummary> = serde_json::from_str(body).unwrap();
        let images: Vec<ObservedImage> = parsed.into_iter().map(ObservedImage::from).collect();

        assert!(images[0].repo_tags.is_empty());
        assert_eq!(images[1].repo_tags, vec!["web:latest"]);
    }

    #[test]
    fn inspect_reads_first_host_port() {
        let body = r#"{ "NetworkSettings": { "Ports": {
            "5000/tcp": [{ "HostIp": "0.0.0.0", "HostPort": "49160" }],
            "6000/tcp": null
        } } }"#;
        let parsed: InspectResponse = serde_json::from_str(body).unwrap();
        let ports = parsed.port_bindings();

        assert_eq!(ports.len(), 1);
        assert_eq!(ports["5000/tcp"], "49160");
    }

    #[test]
    fn daemon_lines_collects_progress() {
        let body = "{\"stream\":\"Step 1/2\\n\"}\n{\"status\":\"Pushing\"}{\"status\":\"\"}";
        let lines = daemon_lines("10.0.0.1", body).unwrap();
        assert_eq!(lines, vec!["Step 1/2", "Pushing"]);
    }

    #[test]
    fn daemon_lines_fails_on_error_record() {
        let body = "{\"status\":\"Pushing\"}\n{\"error\":\"denied\"}\n";
        let err = daemon_lines("10.0.0.1", body).unwrap_err();
        assert!(matches!(err, RuntimeError::Daemon { message, .. } if message == "denied"));
    }

    #[test]
    fn records_split_across_chunks_are_reassembled() {
        let body = "{\"stream\":\"Step 1/2\"}\r\n{\"status\":\"Pushing\"}\r\n";
        let (head, tail) = body.as_bytes().split_at(30);

        let mut records = DaemonRecords::new("10.0.0.1");
        assert_eq!(records.feed(head).unwrap(), vec!["Step 1/2"]);
        assert_eq!(records.feed(tail).unwrap(), vec!["Pushing"]);
        assert!(records.finish().is_ok());
    }

    #[test]
    fn truncated_answer_is_an_error() {
        let mut records = DaemonRecords::new("10.0.0.1");
        assert!(records.feed(b"{\"status\":\"Push").unwrap().is_empty());
        assert!(matches!(records.finish(), Err(RuntimeError::Decode { .. })));
    }

    #[test]
    fn urls_carry_encoded_query() {
        let client = DockerClient::new("10.0.0.1", DEFAULT_RUNTIME_PORT);
        let url = client
            .url("/images/web:1/tag", &[("repo", "10.0.0.1:5000/web"), ("force", "1")])
            .unwrap();
        assert_eq!(url.host_str(), Some("10.0.0.1"));
        assert_eq!(url.port(), Some(4243));
        assert_eq!(url.path(), "/images/web:1/tag");
        assert_eq!(url.query(), Some("repo=10.0.0.1%3A5000%2Fweb&force=1"));
    }
}
