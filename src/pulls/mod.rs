//! Local view of the open pull requests of Bitbucket Server repositories.
use chrono::{DateTime, TimeZone, Utc};

use crate::bitbucket::{BitbucketPullRequest, PullRequestState};

pub use store::PullRequestStore;

mod store;

/// The part of a pull request that the store keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinimalPullRequest {
    pub id: u64,
    pub state: PullRequestState,
    /// Display name of the source branch.
    pub from_ref_display_id: String,
    /// Milliseconds since the Unix epoch.
    pub updated_date: i64,
}

impl MinimalPullRequest {
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.updated_date).single()
    }
}

impl From<&BitbucketPullRequest> for MinimalPullRequest {
    fn from(pull_request: &BitbucketPullRequest) -> Self {
        Self {
            id: pull_request.id,
            state: pull_request.state,
            from_ref_display_id: pull_request.from_ref.display_id.clone(),
            updated_date: pull_request.updated_date,
        }
    }
}

/// How much of a remote listing was read by [`PullRequestStore::refresh_store`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Items read from the listing.
    pub consumed: usize,
    /// Items that replaced or added a store entry.
    pub stored: usize,
    /// Reading stopped at an item older than everything in the store.
    pub stopped_early: bool,
    /// The listing was not ordered from newest to oldest.
    pub unsorted: bool,
}
