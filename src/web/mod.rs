//! HTTP adapter: wallet callback, signing page, and liveness.

pub mod server;
pub mod types;

pub use self::server::{WebState, router, start_server};
