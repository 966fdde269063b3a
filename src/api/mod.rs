pub mod auth;
pub mod live;
pub mod messages;
pub mod state;
pub mod middleware;

pub use state::AppState;
pub use middleware::{CurrentUser, RateLimiter};

use axum::{
    Router,
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::Next,
    routing::{delete, get, patch, post, put},
    middleware as axum_middleware,
};
use tower_http::{
    cors::CorsLayer,
    trace::TraceLayer,
    timeout::TimeoutLayer,
};
use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let Some(origin) = origin else {
        return CorsLayer::permissive();
    };

    match origin.parse::<HeaderValue>() {
        // Cookies need an explicit origin with credentials allowed
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        Err(e) => {
            tracing::warn!("Ignoring invalid CORS_ORIGIN {:?}: {}", origin, e);
            CorsLayer::permissive()
        }
    }
}

pub fn create_router(state: AppState, rate_limiter: Arc<RateLimiter>) -> Router {
    let protected = axum_middleware::from_fn_with_state(state.clone(), middleware::protect_route);

    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .merge(
            Router::new()
                .route("/check", get(auth::check))
                .route("/update-profile", put(auth::update_profile))
                .route_layer(protected.clone()),
        );

    let message_routes = Router::new()
        .route("/users", get(messages::get_users_for_sidebar))
        .route("/live", get(live::ws_handler))
        .route("/:id", get(messages::get_messages))
        .route("/send/:id", post(messages::send_message))
        .route("/update/:id", patch(messages::edit_message))
        .route("/delete/:id", delete(messages::delete_message))
        .route_layer(protected);

    let timeout = Duration::from_secs(state.config.request_timeout_secs);
    let cors = cors_layer(state.config.cors_origin.as_deref());

    Router::new()
        // Health check
        .route("/api/health", get(health))
        .nest("/api/auth", auth_routes)
        .nest("/api/messages", message_routes)
        // Add rate limiting middleware
        .layer(axum_middleware::from_fn(move |req: Request, next: Next| {
            let limiter = rate_limiter.clone();
            middleware::rate_limit_middleware(limiter, req, next)
        }))
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
