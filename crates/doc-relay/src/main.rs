use doc_relay::{Config, RelayState};
use std::panic;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Configuration decides the default log level, so it is read before tracing is up
    let loaded = Config::load();
    let config = loaded.as_ref().cloned().unwrap_or_default();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.default_log_filter().into()),
        )
        .init();

    info!("Starting doc-relay...");
    match &loaded {
        Ok(_) => info!("Configuration loaded successfully"),
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            warn!("Using default configuration");
        }
    }

    let state = RelayState::from_config(&config);
    if let Some(room_id) = state.default_room() {
        info!("New connections join room '{}' automatically", room_id);
    }

    let app = doc_relay::app(state.clone(), &config);

    let listener = tokio::net::TcpListener::bind(config.server_address()).await?;
    info!("Server running on http://{}", config.server_address());
    info!(
        "WebSocket endpoint available at ws://{}{}",
        config.server_address(),
        config.ws_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let dropped = state.registry().clear().await;
    info!("Server stopped, released {} connections", dropped);

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
