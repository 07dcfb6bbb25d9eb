//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Create the application router.
///
/// Image paths have no fixed shape axum can express, so every request that
/// misses the fixed routes goes to the render pipeline. The fixed routes win
/// over a blob that happens to be named `health` or `metrics`.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new().route("/health", get(handlers::health_check));

    // When enabled, /metrics should be network-restricted to the scrapers.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .fallback(handlers::render)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
