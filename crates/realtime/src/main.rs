//! Tripdesk realtime server

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tripdesk_realtime::{
    auth::{JwtManager, RoleTopicPolicy},
    config::LogFormat,
    routes::create_router,
    AppState, Config, HubConfig, RealtimeHub,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine in production
    let _ = dotenvy::dotenv();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_format);

    let resolver = Arc::new(JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours));
    let (hub, tasks) = RealtimeHub::start(HubConfig::from(&config), Arc::new(RoleTopicPolicy));

    let bind_address = config.bind_address.clone();
    let state = AppState::new(config, hub.clone(), resolver);
    let app = create_router(state);

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    tracing::info!(address = %bind_address, "Tripdesk realtime listening");

    let shutdown_hub = hub.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            // Closing sockets first lets upgraded connections finish
            shutdown_hub.begin_shutdown();
        })
        .await
        .context("Server error")?;

    hub.shutdown(tasks).await;
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tripdesk_realtime=info,tower_http=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
