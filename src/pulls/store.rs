use std::fmt::{Display, Formatter};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;

use crate::bitbucket::api::PageStream;
use crate::bitbucket::{BitbucketPullRequest, BitbucketScmRepository, PullRequestState};
use crate::pulls::{MinimalPullRequest, RefreshSummary};

/// Project keys and slugs repeat across servers, so the server id is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    project_key: String,
    repository_slug: String,
    server_id: String,
}

impl CacheKey {
    fn new(project_key: &str, repository_slug: &str, server_id: &str) -> Self {
        Self {
            project_key: project_key.to_string(),
            repository_slug: repository_slug.to_string(),
            server_id: server_id.to_string(),
        }
    }
}

impl From<&BitbucketScmRepository> for CacheKey {
    fn from(repository: &BitbucketScmRepository) -> Self {
        Self::new(
            repository.project_key(),
            repository.repository_slug(),
            repository.server_id(),
        )
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}/{}",
            self.server_id, self.project_key, self.repository_slug
        )
    }
}

/// Newest known pull request of every source branch.
type BranchMap = DashMap<String, MinimalPullRequest>;

/// Concurrent store of the newest known pull request of every branch.
///
/// Updates of a branch are merged by their update timestamp, so the order in which events
/// arrive does not matter. A closed pull request stays in the store and shadows older
/// events of the same branch. Equal timestamps keep the entry that is already stored.
#[derive(Default)]
pub struct PullRequestStore {
    pull_requests: DashMap<CacheKey, Arc<BranchMap>>,
    full_refresh: bool,
}

impl PullRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When `full_refresh` is set, [`PullRequestStore::refresh_store`] always reads the whole
    /// remote listing.
    pub fn with_full_refresh(full_refresh: bool) -> Self {
        Self {
            full_refresh,
            ..Self::default()
        }
    }

    /// Stores `pull_request` under its target repository.
    pub fn add_pull_request(&self, server_id: &str, pull_request: &BitbucketPullRequest) {
        let repository = &pull_request.to_ref.repository;
        let key = CacheKey::new(&repository.project.key, &repository.slug, server_id);
        let branches = self.branches(&key);
        merge(&key, &branches, MinimalPullRequest::from(pull_request));
    }

    /// Records a closed pull request.
    ///
    /// This is the same merge as [`PullRequestStore::add_pull_request`], the state of
    /// `pull_request` marks it as closed.
    pub fn remove_pull_request(&self, server_id: &str, pull_request: &BitbucketPullRequest) {
        self.add_pull_request(server_id, pull_request);
    }

    /// Is the newest known pull request of `branch` open?
    pub fn has_open_pull_requests(
        &self,
        branch: &str,
        repository: &BitbucketScmRepository,
    ) -> bool {
        let Some(branches) = self.existing_branches(&CacheKey::from(repository)) else {
            return false;
        };
        let state = branches.get(branch).map(|pull_request| pull_request.state);
        state.is_some_and(PullRequestState::is_open)
    }

    pub fn get_pull_request(
        &self,
        project_key: &str,
        repository_slug: &str,
        server_id: &str,
        pull_request_id: u64,
    ) -> Option<MinimalPullRequest> {
        let branches =
            self.existing_branches(&CacheKey::new(project_key, repository_slug, server_id))?;
        let found = branches
            .iter()
            .find(|entry| entry.value().id == pull_request_id)
            .map(|entry| entry.value().clone());
        found
    }

    /// Merges a remote listing of pull requests, ordered from newest to oldest, into the store.
    ///
    /// Reading stops at the first item that is older than the oldest stored entry of the
    /// repository, and no further page is requested. The order check only sees the items
    /// read before that point: an out-of-order item behind the stop point goes unnoticed.
    /// Completeness relies on the listing being requested newest first, or on a store
    /// created with a full refresh, which always reads the whole listing.
    /// Entries missing from the listing are kept.
    pub async fn refresh_store(
        &self,
        project_key: &str,
        repository_slug: &str,
        server_id: &str,
        pull_requests: &mut PageStream<BitbucketPullRequest>,
    ) -> RefreshSummary {
        let key = CacheKey::new(project_key, repository_slug, server_id);
        let branches = self.branches(&key);
        let watermark = branches.iter().map(|entry| entry.value().updated_date).min();

        let mut summary = RefreshSummary::default();
        let mut previous: Option<i64> = None;
        while let Some(item) = pull_requests.next().await {
            let pull_request = match item {
                Ok(pull_request) => pull_request,
                Err(error) => {
                    tracing::warn!("Cannot load pull requests of {key}: {error:?}");
                    break;
                }
            };
            summary.consumed += 1;

            if previous.is_some_and(|previous| pull_request.updated_date > previous)
                && !summary.unsorted
            {
                tracing::warn!(
                    "Pull requests of {key} are not ordered from newest to oldest, reading all of them"
                );
                summary.unsorted = true;
            }
            previous = Some(pull_request.updated_date);

            let early_stop = !self.full_refresh && !summary.unsorted;
            if early_stop && watermark.is_some_and(|watermark| pull_request.updated_date < watermark)
            {
                let pull_request = MinimalPullRequest::from(&pull_request);
                tracing::debug!(
                    "Stopping refresh of {key} at pull request #{} updated at {:?}",
                    pull_request.id,
                    pull_request.updated_at()
                );
                pull_requests.stop_stream();
                summary.stopped_early = true;
                break;
            }

            if merge(&key, &branches, MinimalPullRequest::from(&pull_request)) {
                summary.stored += 1;
            }
        }

        tracing::debug!("Refreshed pull requests of {key}: {summary:?}");
        summary
    }

    fn branches(&self, key: &CacheKey) -> Arc<BranchMap> {
        // The outer shard is locked only while the inner map is cloned.
        self.pull_requests.entry(key.clone()).or_default().clone()
    }

    fn existing_branches(&self, key: &CacheKey) -> Option<Arc<BranchMap>> {
        self.pull_requests
            .get(key)
            .map(|branches| branches.value().clone())
    }
}

/// Keeps the entry with the newest update timestamp. Returns true if `incoming` was stored.
fn merge(key: &CacheKey, branches: &BranchMap, incoming: MinimalPullRequest) -> bool {
    match branches.entry(incoming.from_ref_display_id.clone()) {
        Entry::Occupied(mut entry) => {
            if incoming.updated_date > entry.get().updated_date {
                tracing::trace!(
                    "Replacing pull request #{} of {key}:{} with #{} ({:?})",
                    entry.get().id,
                    incoming.from_ref_display_id,
                    incoming.id,
                    incoming.state
                );
                entry.insert(incoming);
                true
            } else {
                tracing::trace!(
                    "Ignoring outdated pull request #{} of {key}:{}",
                    incoming.id,
                    incoming.from_ref_display_id
                );
                false
            }
        }
        Entry::Vacant(entry) => {
            tracing::trace!(
                "Storing pull request #{} of {key}:{}",
                incoming.id,
                incoming.from_ref_display_id
            );
            entry.insert(incoming);
            true
        }
    }
}
