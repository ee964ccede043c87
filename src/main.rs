//! # Gift Planner Authentication Server
//!
//! Serves the passkey ceremonies over HTTP with SQLite storage and the
//! webauthn-rs verifier.

use gift_planner_auth::{router, AppState, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides; "security" carries clone-detection events
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gift_planner_auth=debug,security=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded: {:?}", config);

    let app_state = AppState::new(&config).await?;
    tracing::info!(
        session_ttl_secs = config.ceremony_ttl_secs,
        generic_auth_errors = config.generic_auth_errors,
        "Application state initialized"
    );

    // Expired sessions are already unusable; this only reclaims space
    let sessions = app_state.engine.sessions().clone();
    let reap_interval = config.reap_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(reap_interval);
        loop {
            interval.tick().await;
            tracing::debug!("Running challenge session reaper");
            match sessions.reap_expired().await {
                Ok(0) => {}
                Ok(reaped) => tracing::info!(reaped, "Reaped expired challenge sessions"),
                Err(e) => tracing::error!("Challenge session reaping failed: {:?}", e),
            }
        }
    });

    let app = router(app_state);

    let bind_addr = config.bind_address();
    tracing::info!("Starting server on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        // Keep serving until killed
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
