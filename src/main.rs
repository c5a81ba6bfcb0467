use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use issue_mirror::app::ports::{ObjectStorePort, UpstreamClientPort};
use issue_mirror::app::{LatestCache, LatestResolver, UpstreamFetcher, UrlUploader};
use issue_mirror::config::Config;
use issue_mirror::infra::{BucketStore, ReqwestUpstream};
use issue_mirror::rate_limiter::{Limits, RateLimiter};
use issue_mirror::server::{self, AppState};
use issue_mirror::{logging, observability, tasks};

#[derive(Parser)]
#[command(name = "issue_mirror")]
#[command(about = "Mirrors the daily upstream issue into S3 and serves it")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server and the update scheduler (default)
    Serve,
    /// Fetch the current issue once and exit
    Refresh {
        /// Download even if today's issue is already mirrored
        #[arg(long)]
        force: bool,
    },
    /// Print the newest issue in the store
    Latest,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = logging::init_logging();

    let config = cli.config;
    config.validate()?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, shutdown).await,
        Commands::Refresh { force } => refresh(config, force, shutdown).await,
        Commands::Latest => latest(config, shutdown).await,
    }
}

fn bucket(config: &Config) -> anyhow::Result<Arc<dyn ObjectStorePort>> {
    let store = BucketStore::s3(&config.s3_endpoint, &config.s3_region, &config.s3_bucket)
        .context("Failed to create S3 client")?;
    Ok(Arc::new(store))
}

/// Shared upstream client and the user agent it sends.
struct Upstream {
    client: Arc<dyn UpstreamClientPort>,
    user_agent: String,
}

impl Upstream {
    async fn connect(config: &Config) -> anyhow::Result<Self> {
        let user_agent = config.user_agent().await.context("Failed to load user agent")?;
        let client =
            ReqwestUpstream::new(config.update_timeout).context("Failed to build HTTP client")?;
        Ok(Self { client: Arc::new(client), user_agent })
    }

    fn fetcher(
        &self,
        config: &Config,
        store: Arc<dyn ObjectStorePort>,
        latest: LatestCache,
    ) -> UpstreamFetcher {
        UpstreamFetcher::new(
            self.client.clone(),
            store,
            latest,
            config.update_url.clone(),
            self.user_agent.as_str(),
        )
    }

    fn uploader(&self, store: Arc<dyn ObjectStorePort>) -> UrlUploader {
        UrlUploader::new(self.client.clone(), store, self.user_agent.as_str())
    }
}

async fn serve(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let metrics = match observability::init() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        }
    };

    let store = bucket(&config)?;
    let latest = LatestCache::new();
    let upstream = Upstream::connect(&config).await?;
    let fetcher = Arc::new(upstream.fetcher(&config, store.clone(), latest.clone()));
    let uploader = Arc::new(upstream.uploader(store.clone()));

    let found = LatestResolver::new(store.clone(), config.issue_extension.as_str())
        .resolve_into(&latest, &shutdown)
        .await
        .context("Failed to find latest issue")?;
    match found {
        Some(issue) => info!(issue = %issue, "Found latest issue"),
        None => warn!("No issue found in store"),
    }

    let scheduler = config.schedule()?.map(|schedule| {
        tokio::spawn(tasks::run_refresh_loop(
            fetcher.clone(),
            schedule,
            config.update_on_startup,
            shutdown.clone(),
        ))
    });

    let state = AppState {
        store,
        fetcher,
        latest,
        redirect_to_latest: config.redirect_to_latest,
        uploader,
        update_auth_key: config.update_auth_key().map(str::to_string),
        upload_auth_key: config.upload_auth_key().map(str::to_string),
        metrics,
        limiter: Arc::new(RateLimiter::new(Limits {
            requests: config.limit_requests,
            window: config.limit_window,
        })),
        shutdown: shutdown.clone(),
    };
    let served = server::start_server(state, config.listen_address).await;

    shutdown.cancel();
    if let Some(scheduler) = scheduler {
        let _ = scheduler.await;
    }
    served
}

async fn refresh(config: Config, force: bool, shutdown: CancellationToken) -> anyhow::Result<()> {
    let store = bucket(&config)?;
    let latest = LatestCache::new();
    if !force {
        LatestResolver::new(store.clone(), config.issue_extension.as_str())
            .resolve_into(&latest, &shutdown)
            .await
            .context("Failed to find latest issue")?;
    }
    let issue = Upstream::connect(&config)
        .await?
        .fetcher(&config, store, latest)
        .fetch(force, &shutdown)
        .await
        .context("Update failed")?;
    println!("{}", issue.public_name());
    Ok(())
}

async fn latest(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let store = bucket(&config)?;
    let found = LatestResolver::new(store, config.issue_extension.as_str())
        .resolve(&shutdown)
        .await
        .context("Failed to find latest issue")?;
    match found {
        Some(issue) => println!("{}", issue.public_name()),
        None => println!("No issue found"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
