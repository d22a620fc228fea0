//! # metafs-server
//!
//! Process entrypoint for the metadata-driven virtual filesystem projection
//! engine: loads configuration, connects to the event-sourced store,
//! bootstraps the in-memory projection, spawns the background engine task
//! that tails the live change stream, and serves the REST query API (spec
//! §2 "Control flow at startup", §6 "REST API").
//!
//! The binary itself is thin — almost everything it does is wire up
//! `metafs_core` types behind an axum [`Router`] and a background
//! `tokio::task`. Grounded in the teacher's `ferrex-server` `main.rs`:
//! CLI-overlaid config, a `tracing_subscriber` registry initialized before
//! anything else logs, a `CorsLayer`/`TraceLayer` pair on the router, and a
//! single `axum::serve` call at the bottom.

mod errors;
mod infra;
mod routes;

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use axum::Router;
use clap::Parser;
use metafs_core::{
    PropertyExtractor, Projection, ProjectionConfig, ProjectionEventBus, RedisStoreClient,
    RuleConfigStore, StateBuilder,
};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use infra::config::{CliOverlay, ConfigLoader};
use infra::engine::{self, LiveProjectionSink};
use infra::AppState;

/// Command-line overlay applied on top of file/env configuration (spec §6
/// configuration keys `apiHost`/`apiPort`/`configDir`).
#[derive(Parser, Debug)]
#[command(name = "metafs-server")]
#[command(about = "Projects an event-sourced metadata store into a read-only virtual filesystem")]
struct Args {
    /// Path to a `metafs.toml` config file (overrides the default search
    /// locations and `METAFS_CONFIG_PATH`).
    #[arg(long, env = "METAFS_CONFIG_PATH")]
    config: Option<std::path::PathBuf>,

    /// HTTP bind host (overrides config file and `API_HOST`).
    #[arg(long, env = "API_HOST")]
    host: Option<String>,

    /// HTTP bind port (overrides config file and `API_PORT`).
    #[arg(long, env = "API_PORT")]
    port: Option<u16>,
}

const ENGINE_COMMAND_CHANNEL_CAPACITY: usize = 8;
const PROJECTION_EVENT_BUS_CAPACITY: usize = 256;
const ENGINE_BATCH_SIZE: usize = 100;
const LIVE_TAIL_BLOCK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::new()
        .with_cli(CliOverlay {
            config_path: args.config.clone(),
            host: args.host.clone(),
            port: args.port,
        })
        .load()?
        .config;
    let config = Arc::new(config);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "metafs_server=info,metafs_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        store_url = %config.store.url,
        files_root = %config.files.root.display(),
        config_path = ?config.metadata.config_path,
        "metafs-server starting up"
    );

    std::fs::create_dir_all(&config.config_dir)?;

    let rule_store = Arc::new(RuleConfigStore::new(config.config_dir.clone()));
    let initial_rules = rule_store.get_rules_config().await?;
    let rules = Arc::new(RwLock::new(initial_rules));

    let projection = Arc::new(RwLock::new(Projection::new(ProjectionConfig {
        files_root: config.files.root.display().to_string(),
        share_base: config.webdav_base_url.clone(),
        file_mode: config.permissions.file_mode,
        dir_mode: config.permissions.dir_mode,
        uid: config.permissions.uid,
        gid: config.permissions.gid,
    })));

    let events = Arc::new(ProjectionEventBus::new(PROJECTION_EVENT_BUS_CAPACITY));
    let ready = Arc::new(AtomicBool::new(false));
    let (engine_commands_tx, engine_commands_rx) = mpsc::channel(ENGINE_COMMAND_CHANNEL_CAPACITY);

    let store = RedisStoreClient::connect(&config.store.url).await?;
    let extractor = {
        let rules = rules.read().expect("rule config lock poisoned");
        PropertyExtractor::from_rule_config(&rules)
    };
    let builder = StateBuilder::new(store, extractor);
    let sink = Arc::new(LiveProjectionSink::new(
        projection.clone(),
        rules.clone(),
        events.clone(),
    ));

    let state = AppState {
        config: config.clone(),
        projection,
        rule_store,
        rules,
        events,
        engine_commands: engine_commands_tx,
        ready: ready.clone(),
    };

    let events_for_engine = state.events.clone();
    let engine_handle = tokio::spawn(async move {
        engine::run(
            builder,
            sink,
            events_for_engine,
            engine_commands_rx,
            ENGINE_BATCH_SIZE,
            LIVE_TAIL_BLOCK_TIMEOUT,
        )
        .await;
    });

    // `engine::run` bootstraps before it starts selecting on commands/poll
    // and publishes `RefreshCompleted` right after (spec §2 step 5); this
    // watcher flips `AppState::ready` the first time that happens so
    // `/health` reports `"starting"` until the initial backlog is drained.
    spawn_ready_watcher(ready.clone(), state.events.subscribe());

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    let shutdown = shutdown_signal();
    let serve_result = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await;

    engine_handle.abort();

    if let Err(err) = serve_result {
        error!(error = %err, "server exited with error");
        return Err(err.into());
    }

    info!("metafs-server shut down cleanly");
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_api_router())
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    warn!("shutdown signal received");
}

/// Flips [`AppState::ready`] once the engine publishes its first
/// `RefreshCompleted` (emitted right after bootstrap finishes, spec §2
/// step 5 "once backlog drained"). `/health` reports `"starting"` until
/// then.
fn spawn_ready_watcher(
    ready: Arc<AtomicBool>,
    mut receiver: tokio::sync::broadcast::Receiver<metafs_core::ProjectionEvent>,
) {
    tokio::spawn(async move {
        use metafs_core::ProjectionEvent;
        loop {
            match receiver.recv().await {
                Ok(ProjectionEvent::RefreshCompleted { file_count, .. }) => {
                    info!(file_count, "initial bootstrap complete, marking ready");
                    ready.store(true, std::sync::atomic::Ordering::Relaxed);
                    break;
                }
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
