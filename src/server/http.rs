//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Event streams are long
//! lived responses, so shutdown flips a watch channel that every relay loop
//! listens on and then waits briefly for them to drain.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, Uri};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::auth::{CredentialValidator, IdentityStore};
use crate::config::Args;
use crate::connection::{StopSignals, StreamGauge};
use crate::feed::ChangeFeedSource;
use crate::routes;
use crate::server::cors::CorsPolicy;
use crate::subscription::{StreamKind, SubscriptionConfig, SubscriptionManager};
use crate::types::{GatewayError, Result};

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// How long shutdown waits for open streams to close
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Checks account/secret pairs against the identity store
    pub validator: CredentialValidator,
    /// Opens per-account change-feed subscriptions
    pub subscriptions: SubscriptionManager,
    pub cors: CorsPolicy,
    /// Live stream count, for /health and shutdown draining
    pub streams: StreamGauge,
    shutdown: watch::Sender<bool>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        args: Args,
        identities: Arc<dyn IdentityStore>,
        source: Arc<dyn ChangeFeedSource>,
    ) -> Self {
        let config = SubscriptionConfig {
            stream_collection: args.stream_collection.clone(),
            vespa_collection: args.vespa_collection.clone(),
            owner_field: args.owner_field.clone(),
        };
        let cors = CorsPolicy::new(args.cors_origin_list());
        let (shutdown, _) = watch::channel(false);

        Self {
            args,
            validator: CredentialValidator::new(identities),
            subscriptions: SubscriptionManager::new(source, config),
            cors,
            streams: StreamGauge::default(),
            shutdown,
            started_at: Instant::now(),
        }
    }

    /// Stop signals for a new stream
    pub fn stop_signals(&self) -> StopSignals {
        StopSignals::new(self.shutdown.subscribe(), self.args.stream_max_duration())
    }

    /// Tell every open stream to close
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Bind the configured address and serve until Ctrl-C
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Stream gateway listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    })
    .await
}

/// Serve connections from `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let accepted = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        // Clients dropping an event stream mid-body land here
                        if err.is_incomplete_message() || err.is_canceled() {
                            return;
                        }
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }

    info!("Shutting down, closing {} open stream(s)", state.streams.active());
    state.shutdown();
    if !state.streams.wait_idle(DRAIN_TIMEOUT).await {
        warn!(
            "{} stream(s) still open after {:?}",
            state.streams.active(),
            DRAIN_TIMEOUT
        );
    }

    Ok(())
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    // The query string carries the secret; only the path is logged
    info!("[{}] {} {}", addr, req.method(), req.uri().path());

    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    Ok(route(state, req.method(), req.uri(), origin.as_deref()).await)
}

/// Dispatch one request and apply the CORS policy to the response
pub async fn route(
    state: Arc<AppState>,
    method: &Method,
    uri: &Uri,
    origin: Option<&str>,
) -> Response<BoxBody> {
    let path = uri.path();

    let mut response = match (method, path) {
        (&Method::GET, "/event-stream") => {
            stream_or_error(&state, StreamKind::Events, uri.query()).await
        }
        (&Method::GET, "/vespa-stream") => {
            stream_or_error(&state, StreamKind::Vespa, uri.query()).await
        }

        // Liveness probe
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => {
            to_boxed(routes::health_check(Arc::clone(&state)))
        }

        // Version info for deployment verification
        (&Method::GET, "/version") => to_boxed(routes::version_info()),

        (&Method::OPTIONS, _) => return to_boxed(state.cors.preflight(origin)),

        (_, "/event-stream") | (_, "/vespa-stream") => error_response(
            GatewayError::MethodNotAllowed(format!("{} {}", method, path)),
        ),

        _ => error_response(GatewayError::NotFound(path.to_string())),
    };

    state.cors.apply(origin, &mut response);
    response
}

async fn stream_or_error(
    state: &Arc<AppState>,
    kind: StreamKind,
    query: Option<&str>,
) -> Response<BoxBody> {
    match routes::handle_stream_request(Arc::clone(state), kind, query).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

/// JSON error response with the error's status code
pub fn error_response(err: GatewayError) -> Response<BoxBody> {
    let (status, body) = err.into_status_code_and_body();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    to_boxed(response)
}

pub fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryIdentityStore;
    use crate::feed::MemoryChangeFeed;
    use clap::Parser;
    use hyper::StatusCode;

    fn state() -> Arc<AppState> {
        let args = Args::try_parse_from(["stream-gateway"]).unwrap();
        let identities = Arc::new(MemoryIdentityStore::new());
        identities.insert("u1", "s1");
        Arc::new(AppState::new(
            args,
            identities,
            Arc::new(MemoryChangeFeed::default()),
        ))
    }

    async fn get(state: Arc<AppState>, uri: &str) -> Response<BoxBody> {
        route(state, &Method::GET, &uri.parse().unwrap(), None).await
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let response = get(state(), "/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_post_to_stream_is_not_allowed() {
        let uri: Uri = "/event-stream".parse().unwrap();
        let response = route(state(), &Method::POST, &uri, None).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_credential_errors() {
        let response = get(state(), "/event-stream?userAccount=ghost&uuid=s1").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = get(state(), "/event-stream?userAccount=u1&uuid=nope").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = get(state(), "/vespa-stream?userAccount=u1").await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_stream_headers_and_cors() {
        let uri: Uri = "/event-stream?userAccount=u1&uuid=s1".parse().unwrap();
        let response = route(state(), &Method::GET, &uri, Some("https://heidi.psi.ch")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://heidi.psi.ch"
        );
    }

    #[tokio::test]
    async fn test_health_counts_streams() {
        let state = state();
        let response = get(Arc::clone(&state), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["healthy"], true);
        assert_eq!(value["activeStreams"], 0);
    }

    #[tokio::test]
    async fn test_shutdown_flag() {
        let state = state();
        assert!(!state.is_shutting_down());
        state.shutdown();
        assert!(state.is_shutting_down());
    }
}
