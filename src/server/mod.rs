//! HTTP server for the stream gateway

pub mod cors;
pub mod http;

pub use cors::CorsPolicy;
pub use http::{error_response, route, run, serve, to_boxed, AppState, BoxBody};
