use async_trait::async_trait;
use reqwest::{Method, Url};
use tracing::{debug, warn};

use crate::{api::SecretApi, error::GatekeeperError};

/// Item under which a one-time key is stored.
pub fn one_time_item(one_time_key: &str) -> String {
    format!("key.{one_time_key}")
}

/// HTTP client of a gatekeeper, bound to a caller token.
#[derive(Clone, Debug)]
pub struct GatekeeperClient {
    base: Url,
    token: String,
    http: reqwest::Client,
}

impl GatekeeperClient {
    /// `address` is `host:port`, optionally with an `http://` scheme.
    pub fn new(address: &str, token: impl Into<String>) -> Result<Self, GatekeeperError> {
        Self::with_client(reqwest::Client::new(), address, token)
    }

    pub fn with_client(
        http: reqwest::Client,
        address: &str,
        token: impl Into<String>,
    ) -> Result<Self, GatekeeperError> {
        let raw = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let base = Url::parse(&raw).map_err(|_| GatekeeperError::InvalidAddress(address.into()))?;
        if base.cannot_be_a_base() {
            return Err(GatekeeperError::InvalidAddress(address.into()));
        }
        Ok(Self {
            base,
            token: token.into(),
            http,
        })
    }

    /// Redeem a one-time key handed to a workload.
    ///
    /// Reads the container key stored under the one-time item with the empty token, burns the
    /// item, and returns a client acting with the container key. A failed burn is logged only.
    pub async fn redeem_one_time(
        address: &str,
        one_time_key: &str,
    ) -> Result<Self, GatekeeperError> {
        let anonymous = Self::new(address, "")?;
        let item = one_time_item(one_time_key);

        let container_key = anonymous.get(&item).await?;
        if let Err(e) = anonymous.delete(&item).await {
            warn!(error = %e, "failed to delete one-time key");
        }
        debug!("one-time key redeemed");

        Ok(Self {
            token: container_key,
            ..anonymous
        })
    }

    pub async fn version(&self) -> Result<String, GatekeeperError> {
        let mut url = self.base.clone();
        url.set_path("/version");
        self.send(self.http.get(url)).await
    }

    fn url(&self, collection: &str, item: &str) -> Result<Url, GatekeeperError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| GatekeeperError::InvalidAddress(self.base.to_string()))?
            .clear()
            .push(collection)
            .push(item);
        url.query_pairs_mut().append_pair("key", &self.token);
        Ok(url)
    }

    async fn call(
        &self,
        method: Method,
        collection: &str,
        item: &str,
        body: Option<&str>,
    ) -> Result<String, GatekeeperError> {
        let url = self.url(collection, item)?;
        let mut req = self.http.request(method, url);
        if let Some(body) = body {
            req = req.body(body.to_string());
        }
        self.send(req).await
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<String, GatekeeperError> {
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(GatekeeperError::from_response(status.as_u16(), &body));
        }
        Ok(body)
    }
}

#[async_trait]
impl SecretApi for GatekeeperClient {
    fn token(&self) -> &str {
        &self.token
    }

    async fn get(&self, item: &str) -> Result<String, GatekeeperError> {
        self.call(Method::GET, "object", item, None).await
    }

    async fn create(&self, item: &str, value: &str) -> Result<(), GatekeeperError> {
        self.call(Method::PUT, "object", item, Some(value)).await?;
        Ok(())
    }

    async fn set(&self, item: &str, value: &str) -> Result<(), GatekeeperError> {
        self.call(Method::POST, "object", item, Some(value)).await?;
        Ok(())
    }

    async fn delete(&self, item: &str) -> Result<(), GatekeeperError> {
        self.call(Method::DELETE, "object", item, None).await?;
        Ok(())
    }

    async fn add_access(&self, item: &str, grantee: &str) -> Result<(), GatekeeperError> {
        self.call(Method::POST, "permissions", item, Some(grantee)).await?;
        Ok(())
    }

    async fn remove_access(&self, item: &str, grantee: &str) -> Result<(), GatekeeperError> {
        self.call(Method::DELETE, "permissions", item, Some(grantee)).await?;
        Ok(())
    }

    async fn switch_owner(&self, item: &str, new_owner: &str) -> Result<(), GatekeeperError> {
        self.call(Method::PUT, "permissions", item, Some(new_owner)).await?;
        Ok(())
    }
}
