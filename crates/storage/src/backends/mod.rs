//! Source store implementations.

pub mod filesystem;
pub mod http;
