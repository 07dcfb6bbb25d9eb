//! HTTP request handlers.

pub mod render;

pub use render::render;

/// Liveness probe.
pub async fn health_check() -> &'static str {
    "ok"
}
