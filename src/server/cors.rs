//! CORS policy
//!
//! Browsers may open streams only from allow-listed origins. Credentials are
//! allowed, so the request origin is echoed back instead of `*`.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};

/// Origin allow-list
#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    origins: Vec<String>,
}

impl CorsPolicy {
    pub fn new(origins: Vec<String>) -> Self {
        Self { origins }
    }

    pub fn allows(&self, origin: &str) -> bool {
        self.origins.iter().any(|o| o == origin)
    }

    /// Add CORS headers for `origin` when it is allowed
    pub fn apply<B>(&self, origin: Option<&str>, response: &mut Response<B>) {
        let headers = response.headers_mut();
        headers.append(header::VARY, HeaderValue::from_static("Origin"));

        let Some(origin) = origin.filter(|o| self.allows(o)) else {
            return;
        };
        let Ok(value) = HeaderValue::from_str(origin) else {
            return;
        };
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }

    /// Response to an `OPTIONS` preflight
    pub fn preflight(&self, origin: Option<&str>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = StatusCode::NO_CONTENT;
        if origin.is_some_and(|o| self.allows(o)) {
            let headers = response.headers_mut();
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("GET"),
            );
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("*"),
            );
            headers.insert(
                header::ACCESS_CONTROL_MAX_AGE,
                HeaderValue::from_static("600"),
            );
        }
        self.apply(origin, &mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CorsPolicy {
        CorsPolicy::new(vec!["https://heidi.psi.ch".into(), "http://localhost:5173".into()])
    }

    #[test]
    fn test_allowed_origin_is_echoed() {
        let mut response = Response::new(());
        policy().apply(Some("https://heidi.psi.ch"), &mut response);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://heidi.psi.ch");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[header::VARY], "Origin");
    }

    #[test]
    fn test_unlisted_origin_gets_nothing() {
        let mut response = Response::new(());
        policy().apply(Some("https://evil.example"), &mut response);
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

        let mut response = Response::new(());
        policy().apply(None, &mut response);
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[test]
    fn test_preflight() {
        let ok = policy().preflight(Some("http://localhost:5173"));
        assert_eq!(ok.status(), StatusCode::NO_CONTENT);
        assert_eq!(ok.headers()[header::ACCESS_CONTROL_ALLOW_METHODS], "GET");

        let denied = policy().preflight(Some("https://evil.example"));
        assert!(denied.headers().get(header::ACCESS_CONTROL_ALLOW_METHODS).is_none());
    }
}
