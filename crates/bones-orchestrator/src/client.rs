use std::time::Duration;

use reqwest::{Response, Url};
use tokio::net::TcpStream;
use tracing::{debug, info};

use bones_model::{DesiredDeployment, ProgressDecoder, ProgressMessage};

use crate::error::OrchestratorError;

/// How long a candidate orchestrator gets to accept a connection.
const DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Find an orchestrator among `ips`, listening on `port`.
///
/// Candidates are dialled in order; the first one that accepts within a second and answers
/// `/version` wins.
pub async fn find_orchestrator(
    ips: &[String],
    port: u16,
) -> Result<OrchestratorClient, OrchestratorError> {
    for ip in ips {
        let address = format!("{ip}:{port}");
        match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&address)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                debug!(address = %address, error = %e, "no orchestrator");
                continue;
            }
            Err(_) => {
                debug!(address = %address, "orchestrator dial timed out");
                continue;
            }
        }

        let client = OrchestratorClient::new(&address)?;
        match client.version().await {
            Ok(version) => {
                info!(address = %address, version = %version, "orchestrator found");
                return Ok(client);
            }
            Err(e) => debug!(address = %address, error = %e, "not an orchestrator"),
        }
    }
    Err(OrchestratorError::NotFound)
}

/// HTTP client of an orchestrator.
///
/// Streaming calls log every progress message and fail on the first error record.
#[derive(Clone, Debug)]
pub struct OrchestratorClient {
    base: Url,
    http: reqwest::Client,
}

impl OrchestratorClient {
    /// `address` is `host:port`, optionally with an `http://` scheme.
    pub fn new(address: &str) -> Result<Self, OrchestratorError> {
        let raw = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let base =
            Url::parse(&raw).map_err(|_| OrchestratorError::InvalidAddress(address.into()))?;
        Ok(Self {
            base,
            http: reqwest::Client::new(),
        })
    }

    pub async fn version(&self) -> Result<String, OrchestratorError> {
        let resp = self.http.get(self.endpoint("/version")).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(OrchestratorError::Remote {
                status: status.as_u16().to_string(),
                message: body,
            });
        }
        Ok(body)
    }

    /// Upload a tar(.gz) build context to be built and pushed as `name`.
    ///
    /// Returns the progress messages.
    pub async fn push_image(
        &self,
        name: &str,
        archive: Vec<u8>,
    ) -> Result<Vec<String>, OrchestratorError> {
        let mut url = self.endpoint("/image");
        url.query_pairs_mut().append_pair("name", name);
        let resp = self.http.post(url).body(archive).send().await?;
        consume(resp).await
    }

    /// Submit a deployment and follow it to completion.
    ///
    /// Returns the progress messages.
    pub async fn deploy(
        &self,
        desired: &DesiredDeployment,
    ) -> Result<Vec<String>, OrchestratorError> {
        let body = desired.to_json()?;
        let resp = self
            .http
            .post(self.endpoint("/deploy"))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        consume(resp).await
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url
    }
}

async fn consume(mut resp: Response) -> Result<Vec<String>, OrchestratorError> {
    let status = resp.status();
    let mut decoder = ProgressDecoder::new();
    let mut messages = Vec::new();

    while let Some(chunk) = resp.chunk().await? {
        for msg in decoder.feed(&chunk).map_err(OrchestratorError::Stream)? {
            accept(msg, &mut messages)?;
        }
    }
    if let Some(msg) = decoder.finish().map_err(OrchestratorError::Stream)? {
        accept(msg, &mut messages)?;
    }

    if !status.is_success() {
        return Err(OrchestratorError::Remote {
            status: status.as_u16().to_string(),
            message: messages.join("; "),
        });
    }
    Ok(messages)
}

fn accept(msg: ProgressMessage, messages: &mut Vec<String>) -> Result<(), OrchestratorError> {
    if msg.is_error() {
        return Err(OrchestratorError::Remote {
            status: msg.status.unwrap_or_default(),
            message: msg.message,
        });
    }
    info!("{}", msg.message);
    messages.push(msg.message);
    Ok(())
}
