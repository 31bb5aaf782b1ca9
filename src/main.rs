use std::{net::SocketAddr, sync::Arc, time::Duration};

use car_classifieds::{
    config::Config, create_app, handlers::AppState, services::ExpirationSweeper,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("car_classifieds=debug,tower_http=info"));
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::load()?;
    car_classifieds::utils::file::create_upload_directory(&config.upload_dir)?;

    let state = AppState::new(config).await?;
    let applied = state.database.migrate().await?;
    tracing::info!(count = applied.len(), "database migrations applied");

    if !state.config.ai_enabled() {
        tracing::warn!("AI__API_KEY is not set; AI endpoints will answer 502");
    }

    if state.config.sweeper.enabled {
        let sweeper = ExpirationSweeper::new(
            state.database.clone(),
            state.storage.clone(),
            state.config.sweeper.retention_days,
        )
        .with_metrics(state.metrics.clone());
        Arc::new(sweeper).spawn(Duration::from_secs(state.config.sweeper.interval_secs.max(1)));
        tracing::info!(
            retention_days = state.config.sweeper.retention_days,
            interval_secs = state.config.sweeper.interval_secs,
            "expiration sweeper started"
        );
    }

    let addr: SocketAddr = state.config.bind_address().parse()?;
    let app = create_app(state);

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
