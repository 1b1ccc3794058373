use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// Kinds of webhook events that the bridge subscribes to or understands.
///
/// A single kind can map to several wire-level event ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookEvent {
    RepoRefChange,
    MirrorSynchronized,
    PullRequestOpened,
    /// Covers merged, declined and deleted pull requests.
    PullRequestClosed,
    DiagnosticsPing,
    Unsupported,
}

impl WebhookEvent {
    /// Kinds that can be part of a webhook subscription.
    pub const SUBSCRIBABLE: [WebhookEvent; 4] = [
        WebhookEvent::RepoRefChange,
        WebhookEvent::MirrorSynchronized,
        WebhookEvent::PullRequestOpened,
        WebhookEvent::PullRequestClosed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WebhookEvent::RepoRefChange => "RepoRefChange",
            WebhookEvent::MirrorSynchronized => "MirrorSynchronized",
            WebhookEvent::PullRequestOpened => "PullRequestOpened",
            WebhookEvent::PullRequestClosed => "PullRequestClosed",
            WebhookEvent::DiagnosticsPing => "DiagnosticsPing",
            WebhookEvent::Unsupported => "Unsupported",
        }
    }

    pub fn event_ids(self) -> &'static [&'static str] {
        match self {
            WebhookEvent::RepoRefChange => &["repo:refs_changed"],
            WebhookEvent::MirrorSynchronized => &["mirror:repo_synchronized"],
            WebhookEvent::PullRequestOpened => &["pr:opened"],
            WebhookEvent::PullRequestClosed => &["pr:merged", "pr:declined", "pr:deleted"],
            WebhookEvent::DiagnosticsPing => &["diagnostics:ping"],
            WebhookEvent::Unsupported => &[""],
        }
    }

    /// The first (primary) wire id of this kind.
    pub fn event_id(self) -> &'static str {
        self.event_ids()[0]
    }

    pub fn from_event_id(event_id: &str) -> Self {
        [
            WebhookEvent::RepoRefChange,
            WebhookEvent::MirrorSynchronized,
            WebhookEvent::PullRequestOpened,
            WebhookEvent::PullRequestClosed,
            WebhookEvent::DiagnosticsPing,
        ]
        .into_iter()
        .find(|event| event.event_ids().contains(&event_id))
        .unwrap_or(WebhookEvent::Unsupported)
    }
}

impl Display for WebhookEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Flattens a collection of kinds into the set of their wire ids.
pub fn event_id_set<'a>(events: impl IntoIterator<Item = &'a WebhookEvent>) -> BTreeSet<String> {
    events
        .into_iter()
        .flat_map(|event| event.event_ids())
        .map(|id| id.to_string())
        .collect()
}

/// Wire ids of the pull request kinds (opened and all closed variants).
pub fn pull_request_event_ids() -> BTreeSet<String> {
    event_id_set(&[
        WebhookEvent::PullRequestOpened,
        WebhookEvent::PullRequestClosed,
    ])
}
