//! HTTP image transformation proxy.
//!
//! This crate provides the serving side:
//! - The request pipeline (signature check, negotiation, caching)
//! - The image backend and source plugin seams
//! - Prometheus metrics

pub mod backend;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod negotiate;
pub mod plugin;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
