//! Route table for the HTTP server.

use crate::handlers::{self, AppState};
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Request size limit for `/api` routes: 1MB max payload.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Builds the full application router. `/health` bypasses rate limiting.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    let dashboard_routes = Router::new()
        .route("/tipping/venmo", put(handlers::update_venmo_handle))
        .route(
            "/pixels",
            get(handlers::get_pixel_settings)
                .put(handlers::save_pixel_settings)
                .delete(handlers::delete_pixel_settings),
        )
        .route("/social-links", put(handlers::update_social_links))
        .route(
            "/social-links/:id/verify",
            post(handlers::verify_social_link),
        );

    let billing_routes = Router::new()
        .route(
            "/plan-change/preview",
            get(handlers::preview_plan_change),
        )
        .route(
            "/plan-change",
            post(handlers::execute_plan_change).delete(handlers::cancel_plan_change),
        );

    let admin_routes = Router::new()
        .route(
            "/fit-scores/missing",
            post(handlers::calculate_missing_fit_scores),
        )
        .route(
            "/fit-scores/recalculate",
            post(handlers::recalculate_fit_scores),
        )
        .route("/fit-scores/top", get(handlers::top_fit_profiles))
        .route(
            "/fit-scores/:profile_id",
            post(handlers::calculate_fit_score),
        )
        .route("/profiles/:id/paid-tier", put(handlers::update_paid_tier));

    // Build protected routes with security layers
    let protected_routes = Router::new()
        .nest("/api/dashboard", dashboard_routes)
        .nest("/api/billing", billing_routes)
        .nest("/api/admin", admin_routes)
        .layer(
            ServiceBuilder::new()
                // Outside the body limit: the middleware takes a plain `Request`
                .layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    handlers::api_rate_limit,
                ))
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
