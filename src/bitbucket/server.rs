use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;

use crate::bitbucket::webhook::WebhookDelivery;
use crate::bitbucket::{
    BitbucketEvent, PullRequestEvent, WebhookEvent, WebhookSecret, WEBHOOK_PATH,
};
use crate::pulls::PullRequestStore;

/// Shared server state for all axum handlers.
pub struct ServerState {
    store: Arc<PullRequestStore>,
    server_id: String,
    webhook_secret: Option<WebhookSecret>,
}

impl ServerState {
    pub fn new(
        store: Arc<PullRequestStore>,
        server_id: &str,
        webhook_secret: Option<WebhookSecret>,
    ) -> Self {
        Self {
            store,
            server_id: server_id.to_string(),
            webhook_secret,
        }
    }

    pub fn webhook_secret(&self) -> Option<&WebhookSecret> {
        self.webhook_secret.as_ref()
    }
}

pub type ServerStateRef = Arc<ServerState>;

pub fn create_app(state: ServerState) -> Router {
    Router::new()
        .route(&format!("/{WEBHOOK_PATH}/trigger"), post(webhook_handler))
        .route("/health", get(health_handler))
        .layer(ConcurrencyLimitLayer::new(100))
        .with_state(Arc::new(state))
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "")
}

/// Axum handler that receives a webhook delivery and applies it to the pull request store.
pub async fn webhook_handler(
    State(state): State<ServerStateRef>,
    WebhookDelivery(event): WebhookDelivery,
) -> impl IntoResponse {
    match event {
        BitbucketEvent::PullRequest(event) => {
            handle_pull_request_event(&state.store, &state.server_id, event);
        }
        BitbucketEvent::RefsChanged(event) => {
            tracing::info!(
                "Refs of {}/{} changed ({}): {:?}",
                event.repository.project.key,
                event.repository.slug,
                event.event,
                event.refs
            );
        }
        BitbucketEvent::Ping => {
            tracing::debug!("Received webhook ping");
        }
    }
    (StatusCode::OK, "")
}

/// Opened pull requests are added to the store, closed ones are recorded as closed.
pub fn handle_pull_request_event(
    store: &PullRequestStore,
    server_id: &str,
    event: PullRequestEvent,
) {
    let kind = event.event;
    let event_key = event.event_key.clone();
    let pull_request = event.into_recorded();
    tracing::debug!(
        "Pull request #{} from {} is {:?} ({event_key})",
        pull_request.id,
        pull_request.from_ref.display_id,
        pull_request.state
    );
    match kind {
        WebhookEvent::PullRequestOpened => store.add_pull_request(server_id, &pull_request),
        _ => store.remove_pull_request(server_id, &pull_request),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::bitbucket::server::{create_app, ServerState};
    use crate::bitbucket::BitbucketScmRepository;
    use crate::pulls::PullRequestStore;
    use crate::tests::load_test_file;

    const TRIGGER: &str = "/bitbucket-server-webhook/trigger";

    fn delivery(event: &str, file: &str) -> Request<Body> {
        Request::post(TRIGGER)
            .header("x-event-key", event)
            .header("content-type", "application/json")
            .body(Body::from(load_test_file(file)))
            .unwrap()
    }

    async fn deliver(store: &Arc<PullRequestStore>, event: &str, file: &str) -> StatusCode {
        let app = create_app(ServerState::new(store.clone(), "bbs", None));
        app.oneshot(delivery(event, file)).await.unwrap().status()
    }

    fn repository() -> BitbucketScmRepository {
        BitbucketScmRepository::new("bbs", "PROJ", "repo")
    }

    #[tokio::test]
    async fn opened_then_merged() {
        let store = Arc::new(PullRequestStore::new());
        assert_eq!(
            deliver(&store, "pr:opened", "webhook/pr-opened.json").await,
            StatusCode::OK
        );
        assert!(store.has_open_pull_requests("feature/login", &repository()));

        assert_eq!(
            deliver(&store, "pr:merged", "webhook/pr-merged.json").await,
            StatusCode::OK
        );
        assert!(!store.has_open_pull_requests("feature/login", &repository()));
    }

    #[tokio::test]
    async fn merged_before_opened() {
        let store = Arc::new(PullRequestStore::new());
        deliver(&store, "pr:merged", "webhook/pr-merged.json").await;
        deliver(&store, "pr:opened", "webhook/pr-opened.json").await;
        assert!(!store.has_open_pull_requests("feature/login", &repository()));
    }

    #[tokio::test]
    async fn deleted_pull_request_is_closed() {
        let store = Arc::new(PullRequestStore::new());
        let mut opened: serde_json::Value =
            serde_json::from_str(&load_test_file("webhook/pr-deleted.json")).unwrap();
        opened["eventKey"] = "pr:opened".into();
        let request = Request::post(TRIGGER)
            .header("x-event-key", "pr:opened")
            .body(Body::from(opened.to_string()))
            .unwrap();
        create_app(ServerState::new(store.clone(), "bbs", None))
            .oneshot(request)
            .await
            .unwrap();
        assert!(store.has_open_pull_requests("feature/old", &repository()));

        deliver(&store, "pr:deleted", "webhook/pr-deleted.json").await;
        assert!(!store.has_open_pull_requests("feature/old", &repository()));
    }

    #[tokio::test]
    async fn refs_changed_is_acknowledged() {
        let store = Arc::new(PullRequestStore::new());
        assert_eq!(
            deliver(&store, "repo:refs_changed", "webhook/refs-changed.json").await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn unknown_event_is_acknowledged() {
        let store = Arc::new(PullRequestStore::new());
        assert_eq!(
            deliver(&store, "pr:comment:added", "webhook/pr-comment-added.json").await,
            StatusCode::OK
        );
        assert!(!store.has_open_pull_requests("feature/login", &repository()));
    }

    #[tokio::test]
    async fn health() {
        let app = create_app(ServerState::new(Arc::new(PullRequestStore::new()), "bbs", None));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
