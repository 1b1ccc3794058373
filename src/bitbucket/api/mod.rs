use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::hooks::{CapabilityProbe, WebhookCapabilities};

pub use client::BitbucketRepositoryClient;
pub use paging::{Page, PageStream};

pub mod client;
pub mod paging;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Key of the webhook capability inside the capability document.
const WEBHOOK_CAPABILITY: &str = "webhooks";

/// Provides access to the REST API of a single Bitbucket Server instance.
#[derive(Clone)]
pub struct BitbucketClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<Arc<SecretString>>,
}

impl BitbucketClient {
    pub fn new(base_url: &str, token: Option<SecretString>) -> anyhow::Result<Self> {
        Self::with_timeout(base_url, token, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid Bitbucket base URL `{base_url}`"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow::anyhow!(
                "Bitbucket base URL `{base_url}` cannot be used as a base"
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Could not create HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token: token.map(Arc::new),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns a client scoped to a single repository.
    pub fn repository(&self, project_key: &str, slug: &str) -> BitbucketRepositoryClient {
        BitbucketRepositoryClient::new(self.clone(), project_key, slug)
    }

    /// Appends path segments to the base URL, keeping any context path of the server.
    pub(crate) fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    async fn load_capabilities(&self) -> anyhow::Result<Option<Url>> {
        #[derive(serde::Deserialize, Debug)]
        struct CapabilitiesResponse {
            #[serde(default)]
            capabilities: std::collections::HashMap<String, String>,
        }

        let url = self.url(&["rest", "capabilities"]);
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .context("Cannot load server capabilities")?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("Server does not report capabilities");
            return Ok(None);
        }
        let response: CapabilitiesResponse = response
            .error_for_status()?
            .json()
            .await
            .context("Cannot deserialize server capabilities")?;

        match response.capabilities.get(WEBHOOK_CAPABILITY) {
            Some(link) => {
                let url = Url::parse(link)
                    .with_context(|| format!("Invalid webhook capability link `{link}`"))?;
                Ok(Some(url))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CapabilityProbe for BitbucketClient {
    async fn webhook_capabilities(&self) -> anyhow::Result<WebhookCapabilities> {
        #[derive(serde::Deserialize, Debug)]
        struct WebhookSupportedEvents {
            #[serde(rename = "application-webhooks", default)]
            application_webhooks: BTreeSet<String>,
        }

        let Some(url) = self.load_capabilities().await? else {
            tracing::info!(
                "Server {} does not report a webhook capability",
                self.base_url
            );
            return Ok(WebhookCapabilities::Unsupported);
        };

        let events: WebhookSupportedEvents = self
            .request(Method::GET, url)
            .send()
            .await
            .context("Cannot load webhook capabilities")?
            .error_for_status()?
            .json()
            .await
            .context("Cannot deserialize webhook capabilities")?;
        Ok(WebhookCapabilities::Supported(events.application_webhooks))
    }
}
