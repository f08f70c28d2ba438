//! pairplay binary entrypoint wiring the REST and SSE surface, the dispatch workers,
//! the background sweepers and the session store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use pairplay::{
    config::AppConfig,
    dao::session_store::{MemorySessionStore, SessionStore},
    gateways::content::{ContentCatalog, ContentProvider},
    routes,
    services::{dispatch::Dispatcher, sweepers},
    state::{AppState, SharedState},
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let content: Arc<dyn ContentProvider> = match ContentCatalog::load(&config.content_path) {
        Ok(catalog) => Arc::new(catalog),
        Err(err) => {
            warn!(error = %err, "content catalog unavailable; starting with an empty catalog");
            Arc::new(ContentCatalog::default())
        }
    };

    let app_state = build_state(config, content);
    let dispatcher = Dispatcher::start(&app_state);
    if !app_state.install_dispatcher(dispatcher) {
        warn!("dispatcher already installed");
    }
    tokio::spawn(sweepers::run(Arc::downgrade(&app_state)));

    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Memory store by default; MongoDB under supervision when `MONGO_URI` is set.
fn build_state(config: AppConfig, content: Arc<dyn ContentProvider>) -> SharedState {
    #[cfg(feature = "mongo-store")]
    if env::var_os("MONGO_URI").is_some() {
        let state = AppState::builder(config).content(content).build();
        tokio::spawn(pairplay::services::storage_supervisor::run(
            state.clone(),
            connect_mongo,
        ));
        info!("session store: mongodb (connecting in background)");
        return state;
    }

    info!("session store: in-memory");
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    AppState::builder(config).store(store).content(content).build()
}

#[cfg(feature = "mongo-store")]
async fn connect_mongo() -> Result<Arc<dyn SessionStore>, pairplay::dao::storage::StorageError> {
    use pairplay::dao::session_store::mongodb::{MongoConfig, MongoSessionStore};

    let config = MongoConfig::from_env().await?;
    let store = MongoSessionStore::connect(config).await?;
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
                warn!(error = %err, "SIGTERM handler unavailable; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
