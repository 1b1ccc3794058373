use axum::async_trait;
use axum::extract::{FromRequest, Request};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use chrono::DateTime;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::bitbucket::server::ServerStateRef;
use crate::bitbucket::{
    BitbucketPullRequest, BitbucketRepository, PullRequestState, WebhookEvent,
};

/// Deliveries larger than this are rejected.
const MAX_BODY_SIZE: usize = 4 * 1024 * 1024;

/// Format of the `date` field of webhook payloads, e.g. `2024-03-01T10:15:30+0100`.
const EVENT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// An event delivered by a Bitbucket Server webhook.
#[derive(Debug)]
pub enum BitbucketEvent {
    PullRequest(PullRequestEvent),
    RefsChanged(RefsChangedEvent),
    Ping,
}

#[derive(Debug)]
pub struct PullRequestEvent {
    pub event: WebhookEvent,
    pub event_key: String,
    /// Delivery time in milliseconds since the Unix epoch.
    pub date_millis: Option<i64>,
    pub pull_request: BitbucketPullRequest,
}

impl PullRequestEvent {
    /// The pull request as it should be recorded.
    ///
    /// Deleted pull requests are delivered in their last state and with their last update
    /// time, so they are marked as deleted and dated after that update.
    pub fn into_recorded(self) -> BitbucketPullRequest {
        let mut pull_request = self.pull_request;
        if self.event_key == "pr:deleted" {
            pull_request.state = PullRequestState::Deleted;
            pull_request.updated_date = self
                .date_millis
                .unwrap_or(i64::MIN)
                .max(pull_request.updated_date.saturating_add(1));
        }
        pull_request
    }
}

/// A push to the repository or a finished mirror synchronization.
#[derive(Debug)]
pub struct RefsChangedEvent {
    pub event: WebhookEvent,
    pub repository: BitbucketRepository,
    /// Display names of the changed refs.
    pub refs: Vec<String>,
}

#[derive(serde::Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PullRequestPayload {
    date: Option<String>,
    pull_request: BitbucketPullRequest,
}

#[derive(serde::Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RefChangePayload {
    #[serde(rename = "ref")]
    changed_ref: ChangedRef,
}

#[derive(serde::Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ChangedRef {
    display_id: String,
}

#[derive(serde::Deserialize, Debug)]
struct RefsChangedPayload {
    repository: BitbucketRepository,
    #[serde(default)]
    changes: Vec<RefChangePayload>,
}

/// axum extractor for Bitbucket Server webhook deliveries.
#[derive(Debug)]
pub struct WebhookDelivery(pub BitbucketEvent);

#[async_trait]
impl FromRequest<ServerStateRef> for WebhookDelivery {
    type Rejection = StatusCode;

    async fn from_request(
        request: Request,
        state: &ServerStateRef,
    ) -> Result<Self, Self::Rejection> {
        let (parts, body) = request.into_parts();

        let body = axum::body::to_bytes(body, MAX_BODY_SIZE)
            .await
            .map_err(|error| {
                tracing::error!("Reading webhook body failed: {error:?}");
                StatusCode::BAD_REQUEST
            })?;

        if let Some(secret) = state.webhook_secret() {
            if !verify_signature(&parts.headers, &body, secret) {
                tracing::error!("Webhook request failed, could not authenticate webhook");
                return Err(StatusCode::BAD_REQUEST);
            }
        }

        match parse_webhook_event(&parts, &body) {
            Ok(Some(event)) => Ok(WebhookDelivery(event)),
            Ok(None) => Err(StatusCode::OK),
            Err(error) => {
                tracing::error!("Cannot parse webhook event: {error:?}");
                Err(StatusCode::BAD_REQUEST)
            }
        }
    }
}

fn parse_webhook_event(parts: &Parts, body: &[u8]) -> anyhow::Result<Option<BitbucketEvent>> {
    let Some(event_key) = parts.headers.get("x-event-key") else {
        return Err(anyhow::anyhow!("x-event-key header not found"));
    };
    let event_key = event_key.to_str()?;

    let event = WebhookEvent::from_event_id(event_key);
    match event {
        WebhookEvent::PullRequestOpened | WebhookEvent::PullRequestClosed => {
            let payload: PullRequestPayload = serde_json::from_slice(body)?;
            Ok(Some(BitbucketEvent::PullRequest(PullRequestEvent {
                event,
                event_key: event_key.to_string(),
                date_millis: payload.date.as_deref().and_then(parse_event_date),
                pull_request: payload.pull_request,
            })))
        }
        WebhookEvent::RepoRefChange | WebhookEvent::MirrorSynchronized => {
            let payload: RefsChangedPayload = serde_json::from_slice(body)?;
            Ok(Some(BitbucketEvent::RefsChanged(RefsChangedEvent {
                event,
                repository: payload.repository,
                refs: payload
                    .changes
                    .into_iter()
                    .map(|change| change.changed_ref.display_id)
                    .collect(),
            })))
        }
        WebhookEvent::DiagnosticsPing => Ok(Some(BitbucketEvent::Ping)),
        WebhookEvent::Unsupported => {
            tracing::debug!("Ignoring webhook event {event_key}");
            Ok(None)
        }
    }
}

fn parse_event_date(date: &str) -> Option<i64> {
    match DateTime::parse_from_str(date, EVENT_DATE_FORMAT) {
        Ok(date) => Some(date.timestamp_millis()),
        Err(error) => {
            tracing::warn!("Cannot parse webhook date `{date}`: {error}");
            None
        }
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Verifies that the body was signed with `secret` (`X-Hub-Signature: sha256=<hex>`).
fn verify_signature(headers: &HeaderMap, body: &[u8], secret: &WebhookSecret) -> bool {
    let Some(signature) = headers.get("x-hub-signature").map(|v| v.as_bytes()) else {
        return false;
    };
    let Some(signature) = signature
        .strip_prefix(b"sha256=")
        .and_then(|v| hex::decode(v).ok())
    else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose().as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

/// Secret shared with the server, only readable through [`WebhookSecret::expose`].
pub struct WebhookSecret(SecretString);

impl WebhookSecret {
    pub fn new(secret: String) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret().as_str()
    }
}
