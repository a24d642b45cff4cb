//! HearMeOut Back binary entrypoint wiring REST, SSE and the session store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hearmeout_back::{
    config::{AppConfig, StorageBackend},
    dao::session_store::MemorySessionStore,
    routes,
    services::{housekeeping, image_search::ImageSearchProvider},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = AppState::with_image_search(config.clone(), image_provider(&config));

    match config.storage {
        StorageBackend::Memory => {
            info!("using in-memory session store");
            app_state
                .install_session_store(Arc::new(MemorySessionStore::new()))
                .await;
        }
        StorageBackend::Mongo => spawn_mongo_supervisor(app_state.clone()),
    }

    tokio::spawn(housekeeping::run(app_state.clone()));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state.clone());

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

    app_state.clear_session_store().await;
    info!("server stopped");
    Ok(())
}

#[cfg(feature = "image-search")]
fn image_provider(config: &AppConfig) -> Option<Arc<dyn ImageSearchProvider>> {
    use hearmeout_back::services::image_search::pexels::PexelsProvider;

    match PexelsProvider::new(config.pexels_api_key.clone()) {
        Ok(provider) => Some(Arc::new(provider)),
        Err(err) => {
            warn!(error = %err, "failed to build Pexels client; image search disabled");
            None
        }
    }
}

#[cfg(not(feature = "image-search"))]
fn image_provider(_config: &AppConfig) -> Option<Arc<dyn ImageSearchProvider>> {
    None
}

#[cfg(feature = "mongo-store")]
fn spawn_mongo_supervisor(state: SharedState) {
    use hearmeout_back::{
        dao::{
            session_store::{
                SessionStore,
                mongodb::{MongoConfig, MongoSessionStore},
            },
            storage::StorageError,
        },
        services::storage_supervisor,
    };

    let uri = env::var("MONGO_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into());
    let db_name = env::var("MONGO_DB").ok();

    tokio::spawn(storage_supervisor::run(state, move || {
        let uri = uri.clone();
        let db_name = db_name.clone();
        async move {
            let config = MongoConfig::from_uri(&uri, db_name.as_deref())
                .await
                .map_err(StorageError::from)?;
            let store = MongoSessionStore::connect(config)
                .await
                .map_err(StorageError::from)?;
            Ok::<Arc<dyn SessionStore>, StorageError>(Arc::new(store))
        }
    }));
}

#[cfg(not(feature = "mongo-store"))]
fn spawn_mongo_supervisor(_state: SharedState) {
    warn!("built without the mongo-store feature; staying in degraded mode");
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
