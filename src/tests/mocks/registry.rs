use std::collections::BTreeMap;
use std::sync::Mutex;

use axum::async_trait;

use crate::bitbucket::{BitbucketWebhook, BitbucketWebhookRequest, WebhookId};
use crate::hooks::{CapabilityProbe, WebhookCapabilities, WebhookRegistry};

/// A remote call received by [`InMemoryRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCall {
    List,
    /// Contains the name of the created webhook.
    Create(String),
    Update(WebhookId),
    Delete(WebhookId),
}

#[derive(Default)]
struct RegistryState {
    webhooks: BTreeMap<WebhookId, BitbucketWebhook>,
    next_id: u64,
    calls: Vec<RegistryCall>,
    failures_left: usize,
}

/// Webhook registry that keeps webhooks in memory and records every call.
#[derive(Default)]
pub struct InMemoryRegistry {
    state: Mutex<RegistryState>,
}

impl InMemoryRegistry {
    pub fn with_webhooks(webhooks: Vec<BitbucketWebhook>) -> Self {
        let next_id = webhooks.iter().map(|w| w.id.0).max().unwrap_or(0) + 1;
        Self {
            state: Mutex::new(RegistryState {
                webhooks: webhooks.into_iter().map(|w| (w.id, w)).collect(),
                next_id,
                ..Default::default()
            }),
        }
    }

    /// Makes the next `count` calls fail.
    pub fn fail_next(self, count: usize) -> Self {
        self.state.lock().unwrap().failures_left = count;
        self
    }

    /// Current remote webhooks, ordered by id.
    pub fn webhooks(&self) -> Vec<BitbucketWebhook> {
        self.state.lock().unwrap().webhooks.values().cloned().collect()
    }

    pub fn calls(&self) -> Vec<RegistryCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls that modified (or tried to modify) remote state.
    pub fn writes(&self) -> Vec<RegistryCall> {
        self.calls()
            .into_iter()
            .filter(|call| *call != RegistryCall::List)
            .collect()
    }

    fn record(&self, call: RegistryCall) -> anyhow::Result<std::sync::MutexGuard<RegistryState>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(anyhow::anyhow!("Remote server is unavailable"));
        }
        Ok(state)
    }
}

fn to_webhook(id: WebhookId, request: &BitbucketWebhookRequest) -> BitbucketWebhook {
    BitbucketWebhook {
        id,
        name: request.name.clone(),
        url: request.url.clone(),
        events: request.events.clone(),
        active: request.active,
    }
}

#[async_trait]
impl WebhookRegistry for InMemoryRegistry {
    async fn list_webhooks(&self, event_ids: &[&str]) -> anyhow::Result<Vec<BitbucketWebhook>> {
        let state = self.record(RegistryCall::List)?;
        Ok(state
            .webhooks
            .values()
            .filter(|webhook| webhook.subscribes_to_any(event_ids.iter().copied()))
            .cloned()
            .collect())
    }

    async fn create_webhook(
        &self,
        request: &BitbucketWebhookRequest,
    ) -> anyhow::Result<BitbucketWebhook> {
        let mut state = self.record(RegistryCall::Create(request.name.clone()))?;
        let id = WebhookId(state.next_id);
        state.next_id += 1;
        let webhook = to_webhook(id, request);
        state.webhooks.insert(id, webhook.clone());
        Ok(webhook)
    }

    async fn update_webhook(
        &self,
        id: WebhookId,
        request: &BitbucketWebhookRequest,
    ) -> anyhow::Result<BitbucketWebhook> {
        let mut state = self.record(RegistryCall::Update(id))?;
        let Some(existing) = state.webhooks.get_mut(&id) else {
            return Err(anyhow::anyhow!("Webhook {id} does not exist"));
        };
        *existing = to_webhook(id, request);
        Ok(existing.clone())
    }

    async fn delete_webhook(&self, id: WebhookId) -> anyhow::Result<()> {
        let mut state = self.record(RegistryCall::Delete(id))?;
        match state.webhooks.remove(&id) {
            Some(_) => Ok(()),
            None => Err(anyhow::anyhow!("Webhook {id} does not exist")),
        }
    }
}

/// Capability probe with a fixed answer.
pub struct StaticProbe(Option<WebhookCapabilities>);

impl StaticProbe {
    pub fn supporting(event_ids: &[&str]) -> Self {
        Self(Some(WebhookCapabilities::Supported(
            event_ids.iter().map(|id| id.to_string()).collect(),
        )))
    }

    pub fn unsupported() -> Self {
        Self(Some(WebhookCapabilities::Unsupported))
    }

    pub fn failing() -> Self {
        Self(None)
    }
}

#[async_trait]
impl CapabilityProbe for StaticProbe {
    async fn webhook_capabilities(&self) -> anyhow::Result<WebhookCapabilities> {
        self.0
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Capabilities could not be loaded"))
    }
}

pub fn webhook(id: u64, name: &str, url: &str, events: &[&str]) -> BitbucketWebhook {
    BitbucketWebhook {
        id: WebhookId(id),
        name: name.to_string(),
        url: url.to_string(),
        events: events.iter().map(|event| event.to_string()).collect(),
        active: true,
    }
}
