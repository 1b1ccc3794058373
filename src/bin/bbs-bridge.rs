use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use secrecy::SecretString;
use tracing::Instrument;

use bbs_bridge::bitbucket::api::BitbucketClient;
use bbs_bridge::bitbucket::server::{create_app, ServerState};
use bbs_bridge::bitbucket::WebhookSecret;
use bbs_bridge::config::{BridgeConfig, CONFIG_FILE_PATH};
use bbs_bridge::hooks::{RetryingRegistry, WebhookHandler};
use bbs_bridge::pulls::PullRequestStore;
use bbs_bridge::utils::logging::LogError;

#[derive(clap::Parser)]
struct Opts {
    /// Path to the configuration file.
    #[arg(long, env = "BBS_BRIDGE_CONFIG", default_value = CONFIG_FILE_PATH)]
    config: PathBuf,

    /// Token used to authenticate against the Bitbucket Server REST API.
    #[arg(long, env = "BITBUCKET_TOKEN")]
    token: Option<String>,

    /// Secret used to verify webhook deliveries.
    #[arg(long, env = "WEBHOOK_SECRET")]
    webhook_secret: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Reconciles the webhooks of all configured repositories.
    Register,
    /// Receives webhook deliveries and periodically refreshes open pull requests.
    Serve {
        /// Reconcile webhooks before the server starts.
        #[arg(long)]
        register: bool,
    },
}

async fn register_webhooks(config: &BridgeConfig, client: &BitbucketClient) -> anyhow::Result<()> {
    let mut failed = 0;
    for repository in &config.repositories {
        let span = tracing::info_span!(
            "register",
            repository = format!("{}/{}", repository.project_key, repository.slug)
        );
        let request = match config.register_request(repository) {
            Ok(request) => request,
            Err(error) => {
                span.log_error(error);
                failed += 1;
                continue;
            }
        };

        let handler = WebhookHandler::new(
            client.clone(),
            RetryingRegistry::new(client.repository(&repository.project_key, &repository.slug)),
        );
        match handler.register(&request).instrument(span.clone()).await {
            Ok(webhook) => {
                println!(
                    "{}/{}: {webhook}",
                    repository.project_key, repository.slug
                );
            }
            Err(error) => {
                span.log_error(error);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(anyhow::anyhow!(
            "Webhook registration failed for {failed} of {} repositories",
            config.repositories.len()
        ));
    }
    Ok(())
}

async fn refresh_pull_requests(
    config: &BridgeConfig,
    client: &BitbucketClient,
    store: &PullRequestStore,
) {
    let mut interval = tokio::time::interval(config.refresh_interval);
    loop {
        interval.tick().await;
        for repository in &config.repositories {
            let mut pull_requests = client
                .repository(&repository.project_key, &repository.slug)
                .open_pull_requests();
            let summary = store
                .refresh_store(
                    &repository.project_key,
                    &repository.slug,
                    &config.server_id,
                    &mut pull_requests,
                )
                .await;
            tracing::info!(
                "Refreshed pull requests of {}/{}: read {}, stored {}",
                repository.project_key,
                repository.slug,
                summary.consumed,
                summary.stored
            );
        }
    }
}

async fn server(listener: tokio::net::TcpListener, app: axum::Router) -> anyhow::Result<()> {
    axum::serve(listener, app).await?;
    Ok(())
}

async fn serve(
    config: &BridgeConfig,
    client: &BitbucketClient,
    webhook_secret: Option<WebhookSecret>,
) -> anyhow::Result<()> {
    let store = Arc::new(PullRequestStore::with_full_refresh(config.full_refresh));
    let app = create_app(ServerState::new(
        store.clone(),
        &config.server_id,
        webhook_secret,
    ));
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Cannot bind to {}", config.listen_addr))?;
    tracing::info!("Listening on {}", config.listen_addr);

    tokio::select! {
        () = refresh_pull_requests(config, client, &store) => {
            tracing::warn!("Pull request refresh has ended");
            Ok(())
        },
        res = server(listener, app) => {
            tracing::warn!("Server has ended: {res:?}");
            res
        }
    }
}

fn try_main(opts: Opts) -> anyhow::Result<()> {
    let config = BridgeConfig::load(&opts.config)?;
    let client = BitbucketClient::new(&config.base_url, opts.token.map(SecretString::new))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Cannot build tokio runtime")?;

    runtime.block_on(async move {
        match opts.command {
            Command::Register => register_webhooks(&config, &client).await,
            Command::Serve { register } => {
                if register {
                    if let Err(error) = register_webhooks(&config, &client).await {
                        tracing::Span::current().log_error(error);
                    }
                }
                serve(&config, &client, opts.webhook_secret.map(WebhookSecret::new)).await
            }
        }
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let opts = Opts::parse();
    if let Err(error) = try_main(opts) {
        eprintln!("Error: {error:?}");
        std::process::exit(1);
    }
}
