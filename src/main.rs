use mapsync::{router, AppState, EventBus, ServerConfig, StreamConfig};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mapsync=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting map update stream server");

    let server_config = ServerConfig::new();
    let stream_config = StreamConfig::new();
    info!(
        tick_ms = stream_config.tick_interval.as_millis() as u64,
        tile_flush_ticks = stream_config.tile_flush_ticks,
        channel_capacity = stream_config.channel_capacity,
        "Stream configuration loaded"
    );

    let app_state = AppState::new(stream_config);
    let event_bus = app_state.event_bus.clone();
    let app = router(app_state);

    let listener = match tokio::net::TcpListener::bind(server_config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %server_config.bind_addr, error = %e, "Failed to bind listener");
            std::process::exit(1);
        }
    };
    info!("Server running on http://{}", server_config.bind_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(event_bus))
        .await
    {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }

    info!("Server stopped");
}

/// Waits for Ctrl+C, then closes every open stream so connections can drain
async fn shutdown_signal(event_bus: EventBus) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    event_bus.shutdown();
}
