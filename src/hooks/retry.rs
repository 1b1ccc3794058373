use std::future::Future;

use axum::async_trait;

use crate::bitbucket::{BitbucketWebhook, BitbucketWebhookRequest, WebhookId};
use crate::hooks::WebhookRegistry;
use crate::utils::timing::{perform_retryable, RetryMethod};

/// Retries calls of the wrapped registry according to a [`RetryMethod`].
///
/// Creation is attempted only once. A create that timed out may still have succeeded on the
/// server, and repeating it would leave a duplicate webhook behind.
pub struct RetryingRegistry<R> {
    inner: R,
    retry_method: RetryMethod,
}

impl<R: WebhookRegistry> RetryingRegistry<R> {
    pub fn new(inner: R) -> Self {
        Self::with_method(inner, RetryMethod::default())
    }

    pub fn with_method(inner: R, retry_method: RetryMethod) -> Self {
        Self {
            inner,
            retry_method,
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    async fn retry<T, F, Fut>(&self, operation_name: &str, func: F) -> anyhow::Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        perform(operation_name, self.retry_method.clone(), func).await
    }
}

async fn perform<T, F, Fut>(
    operation_name: &str,
    retry_method: RetryMethod,
    func: F,
) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let result = perform_retryable::<T, anyhow::Error, anyhow::Error, F, Fut>(
        operation_name,
        retry_method,
        func,
    )
    .await;
    Ok(result?)
}

#[async_trait]
impl<R: WebhookRegistry> WebhookRegistry for RetryingRegistry<R> {
    async fn list_webhooks(&self, event_ids: &[&str]) -> anyhow::Result<Vec<BitbucketWebhook>> {
        self.retry("list_webhooks", || self.inner.list_webhooks(event_ids))
            .await
    }

    async fn create_webhook(
        &self,
        request: &BitbucketWebhookRequest,
    ) -> anyhow::Result<BitbucketWebhook> {
        perform(
            "create_webhook",
            self.retry_method.single_attempt(),
            || self.inner.create_webhook(request),
        )
        .await
    }

    async fn update_webhook(
        &self,
        id: WebhookId,
        request: &BitbucketWebhookRequest,
    ) -> anyhow::Result<BitbucketWebhook> {
        self.retry("update_webhook", || self.inner.update_webhook(id, request))
            .await
    }

    async fn delete_webhook(&self, id: WebhookId) -> anyhow::Result<()> {
        self.retry("delete_webhook", || self.inner.delete_webhook(id))
            .await
    }
}
