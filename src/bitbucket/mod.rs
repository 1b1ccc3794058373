//! Contains definitions of common types (pull request, repository, webhook) needed
//! for working with Bitbucket Server repositories.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use itertools::Itertools;

pub mod api;
pub mod event;
pub mod server;
mod webhook;

pub use event::WebhookEvent;
pub use webhook::{
    BitbucketEvent, PullRequestEvent, RefsChangedEvent, WebhookDelivery, WebhookSecret,
};

/// Path under the orchestrator's base URL that receives webhook deliveries.
pub const WEBHOOK_PATH: &str = "bitbucket-server-webhook";

/// Marker stored in the configuration of every webhook created by the bridge.
const CREATED_BY: &str = "bbs-bridge";

/// Identifies a repository of one configured Bitbucket Server instance.
///
/// Project keys and slugs are only unique within a single server, so the server id is part
/// of the identity.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct BitbucketScmRepository {
    server_id: String,
    project_key: String,
    repository_slug: String,
}

impl BitbucketScmRepository {
    pub fn new(server_id: &str, project_key: &str, repository_slug: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            project_key: project_key.to_string(),
            repository_slug: repository_slug.to_string(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn project_key(&self) -> &str {
        &self.project_key
    }

    pub fn repository_slug(&self) -> &str {
        &self.repository_slug
    }
}

impl Display for BitbucketScmRepository {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{}:{}/{}",
            self.server_id, self.project_key, self.repository_slug
        ))
    }
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum PullRequestState {
    Open,
    Merged,
    Declined,
    Deleted,
}

impl PullRequestState {
    pub fn is_open(self) -> bool {
        matches!(self, PullRequestState::Open)
    }
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BitbucketProject {
    pub key: String,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BitbucketRepository {
    pub slug: String,
    pub project: BitbucketProject,
}

/// One side of a pull request (source or target branch).
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BitbucketPullRef {
    pub display_id: String,
    pub repository: BitbucketRepository,
}

/// Pull request as returned by the REST API and embedded in webhook payloads.
/// Fields that the bridge does not use are skipped during deserialization.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BitbucketPullRequest {
    pub id: u64,
    pub state: PullRequestState,
    pub from_ref: BitbucketPullRef,
    pub to_ref: BitbucketPullRef,
    /// Milliseconds since the Unix epoch.
    pub updated_date: i64,
}

#[derive(
    serde::Deserialize, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct WebhookId(pub u64);

impl From<u64> for WebhookId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Display for WebhookId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        <u64 as Display>::fmt(&self.0, f)
    }
}

/// A webhook as it currently exists on the remote server.
#[derive(serde::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BitbucketWebhook {
    pub id: WebhookId,
    pub name: String,
    pub url: String,
    pub events: BTreeSet<String>,
    pub active: bool,
}

impl BitbucketWebhook {
    /// Structural comparison with a request, ignoring the remote id.
    pub fn matches(&self, request: &BitbucketWebhookRequest) -> bool {
        self.name == request.name
            && self.url == request.url
            && self.events == request.events
            && self.active == request.active
    }

    /// Does this webhook subscribe to at least one of the given event ids?
    pub fn subscribes_to_any<'a>(&self, event_ids: impl IntoIterator<Item = &'a str>) -> bool {
        event_ids
            .into_iter()
            .any(|event_id| self.events.contains(event_id))
    }
}

impl Display for BitbucketWebhook {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} `{}` -> {} [{}]{}",
            self.id,
            self.name,
            self.url,
            self.events.iter().join(", "),
            if self.active { "" } else { " (inactive)" }
        )
    }
}

/// Body of a create or update call.
#[derive(serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BitbucketWebhookRequest {
    pub name: String,
    pub events: BTreeSet<String>,
    pub url: String,
    pub active: bool,
    pub configuration: BTreeMap<String, String>,
}

impl BitbucketWebhookRequest {
    pub fn new(name: &str, url: &str, events: BTreeSet<String>) -> Self {
        Self {
            name: name.to_string(),
            events,
            url: url.to_string(),
            active: true,
            configuration: BTreeMap::from([("createdBy".to_string(), CREATED_BY.to_string())]),
        }
    }
}

impl Display for BitbucketWebhookRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "`{}` -> {} [{}]",
            self.name,
            self.url,
            self.events.iter().join(", ")
        )
    }
}
