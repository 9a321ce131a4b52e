//! Eventgate Server - Main entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use eventgate_core::{
    api::{self, AppState},
    auth::AuthSessions,
    config::Config,
    db::Database,
    middleware::session::SessionGate,
    store::{KeyValueStore, RedisStore, TokenBlacklist},
    telemetry,
    token::TokenCodec,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    telemetry::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Eventgate Server"
    );

    // Connect to database
    let db = Database::new(&config.database).await?;
    tracing::info!("Connected to database");

    let cleaned = db.delete_expired_refresh_tokens().await?;
    if cleaned > 0 {
        tracing::info!(count = cleaned, "purged expired refresh tokens");
    }

    // Connect to the shared store
    let store: Arc<dyn KeyValueStore> = Arc::new(RedisStore::connect(&config.redis.url).await?);

    let codec = TokenCodec::with_ttls(
        &config.auth.secret,
        config.auth.access_ttl_secs,
        config.auth.refresh_ttl_secs,
    );
    let blacklist = TokenBlacklist::with_ttl(
        store.clone(),
        Duration::from_secs(config.auth.blacklist_ttl_secs),
    );
    let gate = Arc::new(SessionGate::new(codec.clone(), blacklist.clone()));

    let sessions = AuthSessions::new(db, codec, blacklist, store.clone());

    let app_state = AppState { sessions };
    let app = api::build_router(app_state, gate, store, &config);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
