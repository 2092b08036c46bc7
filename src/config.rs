//! Configuration for the stream gateway
//!
//! CLI arguments and environment variable handling using clap.
//! A `.env` file in the working directory is loaded before parsing.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

/// Origins allowed to open event streams from a browser when
/// `CORS_ORIGINS` is not set.
pub const DEFAULT_CORS_ORIGINS: &str = "http://localhost,http://localhost:8000,http://localhost:5173,https://mx-webapps.psi.ch,https://heidi-test.psi.ch,https://heidi.psi.ch";

/// Log output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, one line per event
    Pretty,
    /// One JSON object per event
    Json,
}

/// Stream gateway - authenticated change-feed subscriptions over SSE
#[derive(Parser, Debug, Clone)]
#[command(name = "stream-gateway")]
#[command(about = "Streams live MongoDB collection changes to authenticated clients as server-sent events")]
pub struct Args {
    /// Unique node identifier for this gateway instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    /// MongoDB connection URI (change streams need a replica set or sharded cluster)
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "heidi")]
    pub mongodb_db: String,

    /// Collection holding identity records (`_id` = account, `uuid` = secret)
    #[arg(long, env = "USER_COLLECTION", default_value = "users")]
    pub user_collection: String,

    /// Collection watched by /event-stream
    #[arg(long, env = "STREAM_COLLECTION", default_value = "events")]
    pub stream_collection: String,

    /// Collection watched by /vespa-stream
    #[arg(long, env = "VESPA_COLLECTION", default_value = "vespa")]
    pub vespa_collection: String,

    /// Document field that names the owning account for /event-stream
    #[arg(long, env = "OWNER_FIELD", default_value = "userAccount")]
    pub owner_field: String,

    /// Ask the store to attach the current full document to update events
    #[arg(long, env = "UPDATE_LOOKUP", default_value = "false")]
    pub update_lookup: bool,

    /// Close every stream after this many seconds (unset = no limit)
    #[arg(long, env = "STREAM_MAX_DURATION_SECS")]
    pub stream_max_duration_secs: Option<u64>,

    /// Comma-separated list of origins allowed by the CORS policy
    #[arg(long, env = "CORS_ORIGINS", default_value = DEFAULT_CORS_ORIGINS)]
    pub cors_origins: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,
}

impl Args {
    /// Parsed CORS origin allow-list
    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Per-stream deadline, if configured
    pub fn stream_max_duration(&self) -> Option<Duration> {
        self.stream_max_duration_secs.map(Duration::from_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("MONGODB_DB", &self.mongodb_db),
            ("USER_COLLECTION", &self.user_collection),
            ("STREAM_COLLECTION", &self.stream_collection),
            ("VESPA_COLLECTION", &self.vespa_collection),
            ("OWNER_FIELD", &self.owner_field),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{} must not be empty", name));
            }
        }

        if self.owner_field.starts_with('$') {
            return Err("OWNER_FIELD must be a plain field path".to_string());
        }

        if self.stream_max_duration_secs == Some(0) {
            return Err("STREAM_MAX_DURATION_SECS must be greater than zero".to_string());
        }

        Ok(())
    }
}
