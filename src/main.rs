//! Raid Sync Back binary entrypoint wiring REST, SSE, the live document store
//! and the archive backend.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use axum::Router;
use raid_sync_back::{
    config::AppConfig,
    dao::{
        archive_store::{ArchiveStore, memory::MemoryArchiveStore},
        storage::StorageError,
    },
    routes,
    services::{ability_service, storage_supervisor},
    state::{AppState, SharedState},
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Archive backend selected through `STORAGE_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveBackend {
    Mongo,
    Couch,
    Memory,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let backend = archive_backend()?;
    let app_state = AppState::new(config);

    spawn_archive_supervisor(app_state.clone(), backend)?;
    tokio::spawn(ability_service::run_request_drainer(app_state.clone()));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, ?backend, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

fn archive_backend() -> anyhow::Result<ArchiveBackend> {
    let raw = env::var("STORAGE_BACKEND").unwrap_or_else(|_| "mongo".into());
    match raw.trim().to_ascii_lowercase().as_str() {
        "mongo" | "mongodb" => Ok(ArchiveBackend::Mongo),
        "couch" | "couchdb" => Ok(ArchiveBackend::Couch),
        "memory" => Ok(ArchiveBackend::Memory),
        other => bail!("unknown STORAGE_BACKEND `{other}` (expected mongo, couch or memory)"),
    }
}

/// Start the background task keeping the archive backend connected.
fn spawn_archive_supervisor(state: SharedState, backend: ArchiveBackend) -> anyhow::Result<()> {
    match backend {
        ArchiveBackend::Memory => {
            warn!("archive kept in memory; summaries and profiles are lost on restart");
            tokio::spawn(storage_supervisor::run(state, connect_memory));
        }
        #[cfg(feature = "mongo-store")]
        ArchiveBackend::Mongo => {
            tokio::spawn(storage_supervisor::run(state, connect_mongo));
        }
        #[cfg(feature = "couch-store")]
        ArchiveBackend::Couch => {
            tokio::spawn(storage_supervisor::run(state, connect_couch));
        }
        #[allow(unreachable_patterns)]
        other => bail!("archive backend {other:?} is not compiled into this binary"),
    }
    Ok(())
}

async fn connect_memory() -> Result<Arc<dyn ArchiveStore>, StorageError> {
    Ok(Arc::new(MemoryArchiveStore::new()))
}

#[cfg(feature = "mongo-store")]
async fn connect_mongo() -> Result<Arc<dyn ArchiveStore>, StorageError> {
    use raid_sync_back::dao::archive_store::mongodb::{MongoArchiveStore, MongoConfig};

    let config = MongoConfig::from_env().await?;
    let store = MongoArchiveStore::connect(config).await?;
    Ok(Arc::new(store))
}

#[cfg(feature = "couch-store")]
async fn connect_couch() -> Result<Arc<dyn ArchiveStore>, StorageError> {
    use raid_sync_back::dao::archive_store::couchdb::{CouchArchiveStore, CouchConfig};

    let config = CouchConfig::from_env()?;
    let store = CouchArchiveStore::connect(config).await?;
    Ok(Arc::new(store))
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
