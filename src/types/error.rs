//! Error types for the stream gateway

use hyper::StatusCode;
use serde::Serialize;

/// Main error type for gateway operations
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Change feed error: {0}")]
    Feed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON body sent with every error response
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    detail: String,
}

impl GatewayError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidParams(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Feed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short, client-facing label for the error class
    fn label(&self) -> &'static str {
        match self {
            Self::InvalidParams(_) => "Unprocessable Entity",
            Self::Unauthorized(_) => "Unauthorized",
            Self::Forbidden(_) => "Forbidden",
            Self::NotFound(_) => "Not Found",
            Self::MethodNotAllowed(_) => "Method Not Allowed",
            Self::Database(_) | Self::Feed(_) => "Service Unavailable",
            Self::Internal(_) => "Internal Server Error",
        }
    }

    /// Convert to status code and JSON body for an HTTP response
    ///
    /// Store-side errors keep their details out of the body; they are logged
    /// where they happen instead.
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let detail = match &self {
            Self::Database(_) | Self::Feed(_) => "Change feed unavailable".to_string(),
            Self::Internal(_) => "Internal error".to_string(),
            Self::InvalidParams(msg)
            | Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::NotFound(msg)
            | Self::MethodNotAllowed(msg) => msg.clone(),
        };
        let body = ErrorBody {
            error: self.label(),
            detail,
        };
        let body = serde_json::to_string(&body)
            .unwrap_or_else(|_| r#"{"error":"Internal Server Error"}"#.to_string());
        (status, body)
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denials_map_to_distinct_statuses() {
        assert_eq!(
            GatewayError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::Feed("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_store_details_stay_out_of_body() {
        let err = GatewayError::Database("connection refused at 10.0.0.3".into());
        let (status, body) = err.into_status_code_and_body();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.contains("10.0.0.3"));

        let err = GatewayError::Forbidden("Access forbidden".into());
        let (_, body) = err.into_status_code_and_body();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["error"], "Forbidden");
        assert_eq!(value["detail"], "Access forbidden");
    }

    #[test]
    fn test_bind_failure_is_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "0.0.0.0:8000 in use");
        let err: GatewayError = io.into();
        let (status, body) = err.into_status_code_and_body();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("8000"));
    }
}
