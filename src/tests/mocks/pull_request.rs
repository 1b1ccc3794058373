use crate::bitbucket::{
    BitbucketProject, BitbucketPullRef, BitbucketPullRequest, BitbucketRepository,
    BitbucketScmRepository, PullRequestState,
};

pub const DEFAULT_SERVER: &str = "bbs";
const DEFAULT_PROJECT: &str = "PROJ";
const DEFAULT_REPO: &str = "repo";

pub fn default_repository() -> BitbucketScmRepository {
    BitbucketScmRepository::new(DEFAULT_SERVER, DEFAULT_PROJECT, DEFAULT_REPO)
}

/// Pull request from `branch` into `main` of the default repository.
pub fn pull_request(
    id: u64,
    state: PullRequestState,
    branch: &str,
    updated_date: i64,
) -> BitbucketPullRequest {
    pull_request_in(DEFAULT_PROJECT, DEFAULT_REPO, id, state, branch, updated_date)
}

pub fn pull_request_in(
    project_key: &str,
    slug: &str,
    id: u64,
    state: PullRequestState,
    branch: &str,
    updated_date: i64,
) -> BitbucketPullRequest {
    let repository = BitbucketRepository {
        slug: slug.to_string(),
        project: BitbucketProject {
            key: project_key.to_string(),
        },
    };
    BitbucketPullRequest {
        id,
        state,
        from_ref: BitbucketPullRef {
            display_id: branch.to_string(),
            repository: repository.clone(),
        },
        to_ref: BitbucketPullRef {
            display_id: "main".to_string(),
            repository,
        },
        updated_date,
    }
}
