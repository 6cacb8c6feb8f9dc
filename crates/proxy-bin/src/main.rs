// ============================
// crates/proxy-bin/src/main.rs
// ============================
//! Proxy server entry point: configuration, logging, graceful shutdown.
use proxy_lib::{config::Settings, ws_router, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration errors are fatal and exit nonzero before anything binds.
    let settings = Settings::load()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting Yahoo draft WebSocket proxy...");
    debug!("Configuration loaded: {:?}", settings);

    let state = Arc::new(AppState::new(settings));
    let app = ws_router::create_router(state.clone());
    info!("Router created");

    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.listen_port()));
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutdown signal received, draining rooms");
    let drained = tokio::time::timeout(
        state.settings.shutdown_timeout(),
        state.registry.shutdown_all(),
    )
    .await;
    if drained.is_err() {
        warn!(
            timeout_ms = state.settings.shutdown_timeout_ms,
            "room drain exceeded shutdown timeout"
        );
    }

    info!("Shutdown complete");
    Ok(())
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
        () = ctrl_c => {},
        () = terminate => {},
    }
}
