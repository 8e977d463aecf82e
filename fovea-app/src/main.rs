//! Fovea session client - main entry point
//!
//! Connects to a backend curation session, mirrors its pushed state into
//! the local store and history, and exposes the setter registry to
//! embedding layers. Headless: rendering is someone else's job.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use fovea_app::mutations::GraphqlClient;
use fovea_app::queries::DatasetLoader;
use fovea_app::router::Router;
use fovea_app::session::{Session, SessionDeps, SessionHooks};
use fovea_app::store::SessionStore;
use fovea_common::config::AppConfig;

const USER_AGENT: &str = concat!("fovea/", env!("CARGO_PKG_VERSION"));

/// Command-line arguments for fovea-app
#[derive(Parser, Debug)]
#[command(name = "fovea-app")]
#[command(about = "Session client for the Fovea dataset curation tool")]
#[command(version)]
struct Args {
    /// Backend server URL
    #[arg(short, long)]
    server: Option<String>,

    /// Stateless mode: take the initial dataset/view from the URL
    #[arg(long)]
    stateless: bool,

    /// Embedding host context (e.g. "notebook")
    #[arg(long)]
    context: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fovea_app=debug,fovea_common=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = AppConfig::resolve(
        args.server.as_deref(),
        args.stateless,
        args.context.as_deref(),
    )
    .context("Failed to resolve configuration")?;

    info!("Starting Fovea session client");
    info!("Server: {}", config.server_url);
    if config.stateless {
        info!("Stateless mode: initial dataset/view come from the URL");
    }

    let http = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to build HTTP client")?;

    let store = Arc::new(SessionStore::new());
    let graphql = GraphqlClient::new(http.clone(), &config.server_url);
    let loader = Arc::new(DatasetLoader::new(graphql.clone(), store.clone()));
    let router = Arc::new(Mutex::new(Router::new(loader)));

    let subscription = Uuid::new_v4();
    info!("Subscription: {subscription}");

    let context = config.context.clone();
    let hooks = SessionHooks {
        refresh: Arc::new(|| info!("cached queries invalidated")),
        screenshot: Arc::new(move || {
            info!(context = context.as_deref(), "capturing screenshot fallback")
        }),
    };

    let session = Session::new(SessionDeps {
        http,
        store,
        router,
        base_url: config.server_url.clone(),
        subscription,
        stateless: config.stateless,
        hooks,
    });

    let cancel = CancellationToken::new();
    tokio::select! {
        result = session.run(cancel.clone()) => {
            result.context("Session failed")?;
            info!("Session ended");
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            cancel.cancel();
        }
    }

    info!("Shutdown complete");
    Ok(())
}
