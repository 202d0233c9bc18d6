//! WhatsApp auto-reply bot.
//!
//! Run with: cargo run -p courier-server
//!
//! Then open http://localhost:3000 and scan the pairing code.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use courier_bridge::{BridgeFactory, CommandBuilder};
use courier_core::{BotConfig, ClientFactory, SessionStore};
use courier_session::{LifecycleManager, storage::SqliteStore};
use courier_transport::http::create_router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = BotConfig::from_env().context("Invalid configuration")?;

    let store: Arc<dyn SessionStore> = Arc::new(SqliteStore::new(&config.store_path));
    let factory: Arc<dyn ClientFactory> = Arc::new(BridgeFactory::new(
        CommandBuilder::new(config.bridge_command.clone()),
        &config.store_path,
        Arc::clone(&store),
        config.event_buffer,
    ));
    let manager = LifecycleManager::builder(store, factory)
        .restart_delay(config.restart_delay)
        .build();

    manager.start();

    let app = create_router(Arc::clone(&manager))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    manager
        .logs()
        .append(format!("Server running on port {}", config.port));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
