use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod errors;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use errors::{AttemptError, StoreError};
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/api/v1", attempt_routes())
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn attempt_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/lessons/{lesson_id}/attempts",
            post(handlers::attempts::try_lesson).get(handlers::attempts::list_lesson_attempts),
        )
        .route(
            "/attempts/{lesson_attempt_id}/pages/{page_attempt_id}",
            put(handlers::attempts::update_page_attempt),
        )
        .route(
            "/attempts/{lesson_attempt_id}/complete",
            post(handlers::attempts::complete_lesson),
        )
        .route(
            "/attempts/{lesson_attempt_id}/permission",
            get(handlers::attempts::check_permission),
        )
}
