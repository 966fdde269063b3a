use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use realtime_chat::{
    api::{create_router, AppState, RateLimiter},
    config::Config,
    db,
    error::AppError,
    live::LiveHub,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,realtime_chat=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting realtime-chat server v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    tracing::info!(production = config.production, "Configuration loaded");

    // Pool + embedded migrations
    let db = db::connect(&config).await?;
    tracing::info!("Database connected and migrated: {}", config.database_url);

    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute, 60));
    tracing::info!("Rate limiter configured ({} req/min per IP)", config.rate_limit_per_minute);

    let state = AppState {
        db,
        config: config.clone(),
        hub: LiveHub::new(),
    };

    // Spawn background task for rate limiter cleanup
    {
        let limiter = rate_limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300)); // Every 5 minutes
            loop {
                interval.tick().await;
                limiter.cleanup().await;
                tracing::debug!("Rate limiter cache cleaned up");
            }
        });
    }

    let app = create_router(state, rate_limiter);

    let addr = config.server_address();
    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("  POST   /api/auth/signup | login | logout");
    tracing::info!("  GET    /api/auth/check, PUT /api/auth/update-profile");
    tracing::info!("  GET    /api/messages/users | /:id | /live");
    tracing::info!("  POST   /api/messages/send/:id");
    tracing::info!("  PATCH  /api/messages/update/:id");
    tracing::info!("  DELETE /api/messages/delete/:id");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
