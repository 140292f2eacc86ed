use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use textale_db::Database;
use textale_gateway::Services;
use textale_gateway::retention::run_retention_loop;
use textale_server::config::Config;
use textale_server::{AppState, build_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "textale_server=debug,textale_gateway=debug,textale_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    // One database holds both the message log and the channel metadata
    let db = Arc::new(Database::open(&config.db_path)?);
    let services = Services::new(db, config.subscriber_buffer);

    // Background retention sweep
    let shutdown = CancellationToken::new();
    let retention = tokio::spawn(run_retention_loop(
        services.clone(),
        config.retention_interval,
        shutdown.clone(),
    ));

    let state = AppState {
        services: services.clone(),
        session_config: config.session_config(),
    };
    let app = build_app(state);

    let addr = config.bind_addr()?;
    info!("Starting Textale server on {}", addr);
    info!(
        "Default channel #{}, history window {}, subscriber buffer {}",
        config.default_channel, config.history_limit, config.subscriber_buffer
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutting down server...");
    shutdown.cancel();
    services.broadcaster.shutdown().await;
    retention.await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Could not install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
