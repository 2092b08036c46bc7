//! HTTP routes for the stream gateway

pub mod health;
pub mod stream;

pub use health::{health_check, version_info, HealthResponse, VersionResponse};
pub use stream::{handle_stream_request, parse_identity};
