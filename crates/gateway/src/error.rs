// Gateway error registry.
//
// Every failure a client can observe maps to an `ErrorKind`, which carries
// three facts: the wire code, the HTTP status used on the REST/handshake
// surface, and whether the WebSocket connection is closed after the error
// frame is sent. Pipeline stages never let an error escape to the transport
// as an unhandled panic or bare close.

use std::future::Future;

use axum::{
    http::{header::HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use crewline_common::protocol::ws::ErrorFrame;
use serde_json::json;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthenticationFailed,
    OriginRejected,
    ValidationFailed,
    SecurityViolation,
    RateLimitExceeded,
    PermissionDenied,
    InternalError,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::OriginRejected => "origin_rejected",
            Self::ValidationFailed => "validation_failed",
            Self::SecurityViolation => "security_violation",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::PermissionDenied => "permission_denied",
            Self::InternalError => "internal_error",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::AuthenticationFailed => StatusCode::UNAUTHORIZED,
            Self::OriginRejected => StatusCode::FORBIDDEN,
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::SecurityViolation => StatusCode::BAD_REQUEST,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the WebSocket connection is torn down after the error frame.
    /// Validation and rate-limit failures leave the connection open so the
    /// client can retry or back off; identity failures do not.
    pub const fn closes_connection(self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed | Self::OriginRejected | Self::PermissionDenied
        )
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication required",
            Self::OriginRejected => "origin not allowed",
            Self::ValidationFailed => "message validation failed",
            Self::SecurityViolation => "message contained disallowed content",
            Self::RateLimitExceeded => "rate limit exceeded",
            Self::PermissionDenied => "permission denied",
            Self::InternalError => "internal server error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn from_kind(kind: ErrorKind) -> Self {
        Self::new(kind, kind.default_message())
    }

    /// The outbound WebSocket representation: `{"type":"error","error":...}`.
    pub fn to_frame(&self) -> ErrorFrame {
        ErrorFrame::new(self.message.clone())
    }

    pub fn closes_connection(&self) -> bool {
        self.kind.closes_connection()
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let request_id = current_request_id();

        let mut response = (
            self.kind.status(),
            Json(json!({
                "error": {
                    "code": self.kind.as_str(),
                    "message": self.message,
                    "request_id": request_id.clone(),
                }
            })),
        )
            .into_response();

        if let Some(request_id) = request_id {
            attach_request_id_header(&mut response, &request_id);
        }

        response
    }
}

pub async fn with_request_id_scope<F>(request_id: String, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(request_id, future).await
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

pub fn request_id_from_headers_or_generate(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn attach_request_id_header(response: &mut Response, request_id: &str) {
    if let Ok(header) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::to_bytes, http::StatusCode, response::IntoResponse};
    use serde_json::Value;

    use super::{with_request_id_scope, ErrorKind, GatewayError};

    #[test]
    fn close_policy_matches_failure_taxonomy() {
        assert!(ErrorKind::AuthenticationFailed.closes_connection());
        assert!(ErrorKind::OriginRejected.closes_connection());
        assert!(ErrorKind::PermissionDenied.closes_connection());
        assert!(!ErrorKind::ValidationFailed.closes_connection());
        assert!(!ErrorKind::RateLimitExceeded.closes_connection());
        assert!(!ErrorKind::SecurityViolation.closes_connection());
    }

    #[test]
    fn error_frame_carries_the_message() {
        let error = GatewayError::new(ErrorKind::RateLimitExceeded, "Rate limit exceeded");
        let frame = error.to_frame();
        assert_eq!(frame.frame_type, "error");
        assert_eq!(frame.error, "Rate limit exceeded");
    }

    #[tokio::test]
    async fn http_response_uses_scoped_request_id() {
        let response = with_request_id_scope("req-scoped-123".to_owned(), async {
            GatewayError::from_kind(ErrorKind::PermissionDenied).into_response()
        })
        .await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("error response body should be readable");
        let parsed: Value =
            serde_json::from_slice(&body).expect("error response body should be valid json");

        assert_eq!(parsed["error"]["code"], "permission_denied");
        assert_eq!(parsed["error"]["request_id"], "req-scoped-123");
    }

    #[test]
    fn status_codes_cover_the_handshake_surface() {
        assert_eq!(ErrorKind::AuthenticationFailed.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::OriginRejected.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::RateLimitExceeded.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
