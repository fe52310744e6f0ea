//! HTTP routing and serving.

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{MethodRouter, post};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::handler::{AppState, checkin};
use crate::store::CheckinStore;

/// Route kept compatible with existing device scripts.
pub const CHECKIN_PATH: &str = "/api/IpCheckin";
pub const CHECKIN_ALIAS: &str = "/checkin";

/// Builds the check-in router.
///
/// Bodies over `config.max_body_bytes` are answered 413 by axum without
/// reaching the handler or the store.
pub fn create_router(config: &Config, store: Option<Arc<dyn CheckinStore>>) -> Router {
    let state = AppState::new(store, config.store_timeout());

    let mut route: MethodRouter<AppState> = post(checkin);
    if config.allow_get {
        route = route.get(checkin);
    }

    Router::new()
        .route(CHECKIN_PATH, route.clone())
        .route(CHECKIN_ALIAS, route)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until Ctrl-C or SIGTERM.
pub async fn start_server(
    config: &Config,
    store: Option<Arc<dyn CheckinStore>>,
) -> Result<(), std::io::Error> {
    let addr = config
        .socket_addr()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let app = create_router(config, store);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening for check-ins");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
