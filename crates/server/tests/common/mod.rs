//! Common test utilities and fixtures.

pub mod backend;
pub mod fixtures;
pub mod server;

#[allow(unused_imports)]
pub use backend::*;
#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use server::*;
