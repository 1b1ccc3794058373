//! Reconciliation of the webhooks that a Bitbucket Server repository sends to the orchestrator.
use std::collections::BTreeSet;

use axum::async_trait;

use crate::bitbucket::{BitbucketWebhook, BitbucketWebhookRequest, WebhookId};

pub use handler::{RegisterError, WebhookHandler};
pub use request::{InvalidRequest, WebhookRegisterRequest, WebhookRegisterRequestBuilder};
pub use retry::RetryingRegistry;

mod handler;
mod request;
mod retry;

/// CRUD access to the webhooks of a single repository.
#[async_trait]
pub trait WebhookRegistry: Send + Sync {
    /// Lists webhooks subscribed to at least one of the given event ids.
    async fn list_webhooks(&self, event_ids: &[&str]) -> anyhow::Result<Vec<BitbucketWebhook>>;

    async fn create_webhook(
        &self,
        request: &BitbucketWebhookRequest,
    ) -> anyhow::Result<BitbucketWebhook>;

    async fn update_webhook(
        &self,
        id: WebhookId,
        request: &BitbucketWebhookRequest,
    ) -> anyhow::Result<BitbucketWebhook>;

    async fn delete_webhook(&self, id: WebhookId) -> anyhow::Result<()>;
}

/// What the webhook feature of a server instance can deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookCapabilities {
    /// Wire ids of the events that the server can deliver.
    Supported(BTreeSet<String>),
    /// The server predates webhook capability reporting.
    Unsupported,
}

#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn webhook_capabilities(&self) -> anyhow::Result<WebhookCapabilities>;
}
