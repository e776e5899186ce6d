//! Beat Room - collaborative beat sequencing rooms.
//!
//! This is the main library crate for the room server. Participants join a
//! room to get an exclusive percussion voice, then open a channel to trade
//! beat segments with everyone else in the room.

pub mod config;
pub mod room;
pub mod server;
pub mod utils;

use config::ServerConfig;
use room::Rooms;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beat_room_lib=debug,axum=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Run the server until Ctrl-C
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting Beat Room v{}", env!("CARGO_PKG_VERSION"));

    let rooms = Rooms::new(config.registry());
    let app = server::router(rooms);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
