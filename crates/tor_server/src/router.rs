//! Router construction for the TOR server.

use std::sync::Arc;

use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Extension, Router,
};
use tor_core::service::TorService;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::jwt::{jwt_auth, JwtConfig};
use crate::middleware::rate_limit::{rate_limit, RateLimitState};

/// Build the full axum router with all routes and middleware.
pub fn build_router(
    service: Arc<dyn TorService>,
    jwt_config: JwtConfig,
    limits: RateLimitState,
) -> Router {
    // Authenticated, then rate limited per user
    let protected = Router::new()
        .route(
            "/tor",
            get(handlers::tor::list_tors).post(handlers::tor::create_tor),
        )
        .route(
            "/tor/:id",
            get(handlers::tor::get_tor).put(handlers::tor::update_tor),
        )
        .route("/tor/:id/history", get(handlers::tor::history))
        .route("/tor/:id/submit", post(handlers::tor::submit))
        .route("/tor/:id/approve", post(handlers::tor::approve))
        .route("/tor/:id/revise", post(handlers::tor::revise))
        .route("/tor/:id/reject", post(handlers::tor::reject))
        .route("/tor/:id/export", post(handlers::tor::export))
        .route("/workflows/:unit_id", get(handlers::workflow::get_workflow))
        .layer(axum_mw::from_fn(rate_limit))
        .layer(axum_mw::from_fn(jwt_auth))
        .layer(Extension(jwt_config))
        .layer(Extension(limits));

    // Public routes (no auth)
    let public = Router::new().route("/health", get(handlers::health::health));

    public
        .merge(protected)
        .layer(Extension(service))
        .layer(TraceLayer::new_for_http())
}
