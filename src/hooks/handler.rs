use std::cmp::Reverse;
use std::collections::BTreeSet;

use crate::bitbucket::event::{event_id_set, pull_request_event_ids};
use crate::bitbucket::{BitbucketWebhook, BitbucketWebhookRequest, WebhookEvent};
use crate::hooks::{CapabilityProbe, WebhookCapabilities, WebhookRegisterRequest, WebhookRegistry};
use crate::utils::text::pluralize;

#[derive(thiserror::Error, Debug)]
pub enum RegisterError {
    /// No event could be selected for the requested webhook.
    #[error("Webhook cannot be registered: {0}")]
    WebhookUnsupported(String),
    #[error(transparent)]
    Remote(#[from] anyhow::Error),
}

/// Independent webhook slots of a repository.
///
/// A mirror repository only ever uses the mirror lane. When the server cannot notify about
/// mirror synchronization, that lane falls back to ref changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Mirror,
    Primary,
}

impl Lane {
    fn of(request: &WebhookRegisterRequest) -> Self {
        if request.is_mirror() {
            Lane::Mirror
        } else {
            Lane::Primary
        }
    }

    /// Is `webhook` a candidate for convergence to `target` in this lane?
    ///
    /// A webhook that touches the mirror event belongs to the mirror lane only. In fallback
    /// mode the mirror lane also owns webhooks with ref changes but no pull request events.
    fn owns(self, webhook: &BitbucketWebhook, target: &BTreeSet<String>) -> bool {
        let mirror = subscribes_to_any(webhook, &mirror_event_ids());
        match self {
            Lane::Mirror => {
                let fallback = *target == ref_event_ids();
                mirror
                    || (fallback
                        && subscribes_to_any(webhook, &ref_event_ids())
                        && !subscribes_to_any(webhook, &pull_request_event_ids()))
            }
            Lane::Primary => !mirror && subscribes_to_any(webhook, &primary_event_ids()),
        }
    }
}

fn mirror_event_ids() -> BTreeSet<String> {
    event_id_set(&[WebhookEvent::MirrorSynchronized])
}

fn primary_event_ids() -> BTreeSet<String> {
    let mut ids = ref_event_ids();
    ids.extend(pull_request_event_ids());
    ids
}

fn ref_event_ids() -> BTreeSet<String> {
    event_id_set(&[WebhookEvent::RepoRefChange])
}

fn subscribes_to_any(webhook: &BitbucketWebhook, event_ids: &BTreeSet<String>) -> bool {
    webhook.subscribes_to_any(event_ids.iter().map(String::as_str))
}

/// Brings the webhooks of a repository in line with a [`WebhookRegisterRequest`].
///
/// Every call is idempotent: when the remote state already matches the request, nothing is
/// written. Remote errors are returned unchanged, wrap the registry in
/// [`RetryingRegistry`](crate::hooks::RetryingRegistry) to retry them.
pub struct WebhookHandler<P, R> {
    probe: P,
    registry: R,
}

impl<P: CapabilityProbe, R: WebhookRegistry> WebhookHandler<P, R> {
    pub fn new(probe: P, registry: R) -> Self {
        Self { probe, registry }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Registers the webhook described by `request` and returns the webhook now in effect.
    pub async fn register(
        &self,
        request: &WebhookRegisterRequest,
    ) -> Result<BitbucketWebhook, RegisterError> {
        let desired = event_id_set(&self.select_events(request).await?);
        let callback_url = request.callback_url();
        tracing::debug!(
            "Registering webhook `{}` for {}/{} with events {desired:?}",
            request.name(),
            request.project_key(),
            request.repository_slug()
        );

        let known = event_id_set(&WebhookEvent::SUBSCRIBABLE);
        let known_ids: Vec<&str> = known.iter().map(String::as_str).collect();
        let owned: Vec<BitbucketWebhook> = self
            .registry
            .list_webhooks(&known_ids)
            .await?
            .into_iter()
            .filter(|webhook| subscribes_to_any(webhook, &known))
            .filter(|webhook| webhook.name == request.name() || webhook.url == callback_url)
            .collect();

        let lane = Lane::of(request);
        let candidates: Vec<&BitbucketWebhook> = owned
            .iter()
            .filter(|webhook| lane.owns(webhook, &desired))
            .collect();
        let webhook = self
            .converge(lane, request, &callback_url, desired, candidates)
            .await?;
        Ok(webhook)
    }

    async fn select_events(
        &self,
        request: &WebhookRegisterRequest,
    ) -> Result<Vec<WebhookEvent>, RegisterError> {
        let mut events = vec![];
        if request.is_mirror() {
            match self.probe.webhook_capabilities().await? {
                WebhookCapabilities::Supported(ids) => {
                    if ids.contains(WebhookEvent::MirrorSynchronized.event_id()) {
                        events.push(WebhookEvent::MirrorSynchronized);
                    } else if ids.contains(WebhookEvent::RepoRefChange.event_id()) {
                        tracing::warn!(
                            "Server cannot notify about mirror synchronization, falling back to ref changes"
                        );
                        events.push(WebhookEvent::RepoRefChange);
                    } else {
                        return Err(RegisterError::WebhookUnsupported(
                            "the server supports neither mirror synchronization nor ref change events"
                                .to_string(),
                        ));
                    }
                }
                WebhookCapabilities::Unsupported => {
                    tracing::debug!("Webhook capabilities are not reported, using ref changes");
                    events.push(WebhookEvent::RepoRefChange);
                }
            }
        } else {
            if request.trigger_on_push() {
                events.push(WebhookEvent::RepoRefChange);
            }
            if request.trigger_on_pr() {
                events.push(WebhookEvent::PullRequestOpened);
                events.push(WebhookEvent::PullRequestClosed);
            }
        }

        if events.is_empty() {
            return Err(RegisterError::WebhookUnsupported(
                "no events were selected".to_string(),
            ));
        }
        Ok(events)
    }

    /// Leaves exactly one webhook with the wanted events in `lane`.
    async fn converge(
        &self,
        lane: Lane,
        request: &WebhookRegisterRequest,
        callback_url: &str,
        lane_events: BTreeSet<String>,
        candidates: Vec<&BitbucketWebhook>,
    ) -> anyhow::Result<BitbucketWebhook> {
        if candidates.is_empty() {
            let body = BitbucketWebhookRequest::new(request.name(), callback_url, lane_events);
            let webhook = self.registry.create_webhook(&body).await?;
            tracing::info!("Created {lane:?} webhook {webhook}");
            return Ok(webhook);
        }

        let (target, mut pool) = match lane {
            Lane::Mirror => (lane_events, candidates.clone()),
            Lane::Primary => select_primary_target(lane_events, &candidates),
        };
        let body = BitbucketWebhookRequest::new(request.name(), callback_url, target);

        // Stable sort, the first listed webhook wins ties.
        pool.sort_by_key(|webhook| {
            Reverse((
                webhook.url == callback_url,
                webhook.name == request.name(),
                webhook.active,
                webhook.events == body.events,
            ))
        });
        let kept = pool[0];

        let webhook = if kept.matches(&body) {
            tracing::debug!("Webhook {kept} is up to date");
            kept.clone()
        } else {
            let webhook = self.registry.update_webhook(kept.id, &body).await?;
            tracing::info!("Updated {lane:?} webhook {kept} to {webhook}");
            webhook
        };

        let obsolete: Vec<&BitbucketWebhook> = candidates
            .into_iter()
            .filter(|webhook| webhook.id != kept.id)
            .collect();
        if !obsolete.is_empty() {
            tracing::info!(
                "Deleting {} obsolete {}",
                obsolete.len(),
                pluralize("webhook", obsolete.len())
            );
        }
        for webhook in obsolete {
            self.registry.delete_webhook(webhook.id).await?;
            tracing::info!("Deleted webhook {webhook}");
        }
        Ok(webhook)
    }
}

/// Chooses the event set and the candidates that may be converged to it in the primary lane.
///
/// A webhook that already covers ref changes and pull requests is preferred. A ref-only or
/// pull-request-only webhook is reused as is when it is exactly what was requested. Otherwise
/// any candidate is broadened to all primary events.
fn select_primary_target<'a>(
    lane_events: BTreeSet<String>,
    candidates: &[&'a BitbucketWebhook],
) -> (BTreeSet<String>, Vec<&'a BitbucketWebhook>) {
    let ref_ids = ref_event_ids();
    let pr_ids = pull_request_event_ids();

    let combined: Vec<&BitbucketWebhook> = candidates
        .iter()
        .copied()
        .filter(|webhook| {
            subscribes_to_any(webhook, &ref_ids) && subscribes_to_any(webhook, &pr_ids)
        })
        .collect();
    if !combined.is_empty() {
        return (primary_event_ids(), combined);
    }

    for single in [ref_ids, pr_ids] {
        if lane_events == single {
            let exact: Vec<&BitbucketWebhook> = candidates
                .iter()
                .copied()
                .filter(|webhook| webhook.events == single)
                .collect();
            if !exact.is_empty() {
                return (single, exact);
            }
        }
    }

    (primary_event_ids(), candidates.to_vec())
}
