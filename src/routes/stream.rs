//! Event stream endpoints
//!
//! - GET /event-stream?userAccount=..&uuid=.. - caller's own events
//! - GET /vespa-stream?userAccount=..&uuid=.. - projected vespa records of the caller's group
//!
//! Credentials and the subscription are settled before the response head is
//! sent, so failures still get a proper status code. After that the relay
//! runs in its own task and owns the connection until it closes.

use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};
use std::sync::Arc;
use tracing::{info_span, Instrument};

use crate::auth::Identity;
use crate::connection::Connection;
use crate::server::{AppState, BoxBody};
use crate::sse;
use crate::subscription::StreamKind;
use crate::types::{GatewayError, Result};

/// Parse `userAccount` and `uuid` from the query string
pub fn parse_identity(query: Option<&str>) -> Result<Identity> {
    serde_urlencoded::from_str(query.unwrap_or(""))
        .map_err(|e| GatewayError::InvalidParams(e.to_string()))
}

/// Authenticate, subscribe and hand back the streaming response
pub async fn handle_stream_request(
    state: Arc<AppState>,
    kind: StreamKind,
    query: Option<&str>,
) -> Result<Response<BoxBody>> {
    let identity = parse_identity(query)?;
    let mut conn = Connection::new(kind, identity.account_id.clone());

    conn.authenticate(&state.validator, &identity).await?;
    let subscription = conn.subscribe(&state.subscriptions).await?;

    let (writer, body) = sse::channel();
    let span = info_span!("stream", conn_id = %conn.id(), account = %conn.account_id());
    let stop = state.stop_signals();
    let gauge = state.streams.clone();
    tokio::spawn(conn.relay(subscription, writer, stop, gauge).instrument(span));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(sse::CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identity() {
        let identity = parse_identity(Some("userAccount=e12345&uuid=abc")).unwrap();
        assert_eq!(identity.account_id, "e12345");
        assert_eq!(identity.secret, "abc");

        // Unknown parameters are ignored
        assert!(parse_identity(Some("userAccount=a&uuid=b&extra=1")).is_ok());
    }

    #[test]
    fn test_missing_params_are_invalid() {
        for query in [None, Some(""), Some("userAccount=a"), Some("uuid=b")] {
            let err = parse_identity(query).unwrap_err();
            assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        }
    }
}
