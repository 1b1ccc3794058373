use anyhow::Context;
use axum::async_trait;
use futures::{FutureExt, TryStreamExt};
use reqwest::Method;
use url::Url;

use crate::bitbucket::api::{BitbucketClient, Page, PageStream};
use crate::bitbucket::{
    BitbucketPullRequest, BitbucketWebhook, BitbucketWebhookRequest, WebhookId,
};
use crate::hooks::WebhookRegistry;

/// Provides access to a single repository through the REST API of Bitbucket Server.
#[derive(Clone)]
pub struct BitbucketRepositoryClient {
    client: BitbucketClient,
    project_key: String,
    slug: String,
}

impl BitbucketRepositoryClient {
    pub(super) fn new(client: BitbucketClient, project_key: &str, slug: &str) -> Self {
        Self {
            client,
            project_key: project_key.to_string(),
            slug: slug.to_string(),
        }
    }

    pub fn project_key(&self) -> &str {
        &self.project_key
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Streams the open pull requests targeting this repository, newest first.
    pub fn open_pull_requests(&self) -> PageStream<BitbucketPullRequest> {
        let client = self.client.clone();
        let base = self.url(&["pull-requests"]);
        PageStream::new(move |start| {
            let mut url = base.clone();
            url.query_pairs_mut()
                .append_pair("state", "OPEN")
                .append_pair("order", "NEWEST")
                .append_pair("withAttributes", "false")
                .append_pair("withProperties", "false")
                .append_pair("start", &start.to_string());
            fetch_page(client.clone(), url).boxed()
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut path = vec![
            "rest",
            "api",
            "1.0",
            "projects",
            self.project_key.as_str(),
            "repos",
            self.slug.as_str(),
        ];
        path.extend_from_slice(segments);
        self.client.url(&path)
    }

    fn webhooks_url(&self, id: Option<WebhookId>) -> Url {
        match id {
            Some(id) => self.url(&["webhooks", &id.to_string()]),
            None => self.url(&["webhooks"]),
        }
    }

    async fn send_webhook(
        &self,
        method: Method,
        url: Url,
        request: &BitbucketWebhookRequest,
    ) -> anyhow::Result<BitbucketWebhook> {
        let webhook = self
            .client
            .request(method, url)
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(webhook)
    }
}

async fn fetch_page<T: serde::de::DeserializeOwned>(
    client: BitbucketClient,
    url: Url,
) -> anyhow::Result<Page<T>> {
    tracing::trace!("Loading page {url}");
    let page = client
        .request(Method::GET, url.clone())
        .send()
        .await
        .with_context(|| format!("Cannot load page {url}"))?
        .error_for_status()?
        .json()
        .await
        .with_context(|| format!("Cannot deserialize page {url}"))?;
    Ok(page)
}

#[async_trait]
impl WebhookRegistry for BitbucketRepositoryClient {
    async fn list_webhooks(&self, event_ids: &[&str]) -> anyhow::Result<Vec<BitbucketWebhook>> {
        let client = self.client.clone();
        let base = self.webhooks_url(None);
        let event_ids: Vec<String> = event_ids.iter().map(|id| id.to_string()).collect();
        let webhooks = PageStream::<BitbucketWebhook>::new(move |start| {
            let mut url = base.clone();
            {
                let mut query = url.query_pairs_mut();
                for event_id in &event_ids {
                    query.append_pair("event", event_id);
                }
                query
                    .append_pair("statistics", "false")
                    .append_pair("start", &start.to_string());
            }
            fetch_page(client.clone(), url).boxed()
        })
        .try_collect::<Vec<_>>()
        .await
        .with_context(|| format!("Cannot list webhooks of {}/{}", self.project_key, self.slug))?;
        Ok(webhooks)
    }

    async fn create_webhook(
        &self,
        request: &BitbucketWebhookRequest,
    ) -> anyhow::Result<BitbucketWebhook> {
        self.send_webhook(Method::POST, self.webhooks_url(None), request)
            .await
            .with_context(|| format!("Cannot create webhook {request}"))
    }

    async fn update_webhook(
        &self,
        id: WebhookId,
        request: &BitbucketWebhookRequest,
    ) -> anyhow::Result<BitbucketWebhook> {
        self.send_webhook(Method::PUT, self.webhooks_url(Some(id)), request)
            .await
            .with_context(|| format!("Cannot update webhook #{id} to {request}"))
    }

    async fn delete_webhook(&self, id: WebhookId) -> anyhow::Result<()> {
        self.client
            .request(Method::DELETE, self.webhooks_url(Some(id)))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("Cannot delete webhook #{id}"))?;
        Ok(())
    }
}
