use std::future::Future;

use axum::{
    http::{header::HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use cowatch_common::protocol::ws::ServerEvent;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::AuthError;
use crate::store::StoreError;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationFailed,
    AuthInvalidToken,
    AuthRequired,
    NotFound,
    NotGroupHost,
    AlreadyInGroup,
    NotInGroup,
    UpstreamTimeout,
    UpstreamUnavailable,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::AuthInvalidToken => "AUTH_INVALID_TOKEN",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::NotFound => "NOT_FOUND",
            Self::NotGroupHost => "NOT_GROUP_HOST",
            Self::AlreadyInGroup => "ALREADY_IN_GROUP",
            Self::NotInGroup => "NOT_IN_GROUP",
            Self::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            Self::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::AuthInvalidToken => StatusCode::UNAUTHORIZED,
            Self::AuthRequired => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::NotGroupHost => StatusCode::FORBIDDEN,
            Self::AlreadyInGroup => StatusCode::CONFLICT,
            Self::NotInGroup => StatusCode::CONFLICT,
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn retryable(self) -> bool {
        matches!(self, Self::UpstreamTimeout | Self::UpstreamUnavailable | Self::InternalError)
    }

    /// Fatal codes close the connection after the `fatal_error` event.
    pub const fn fatal(self) -> bool {
        matches!(self, Self::AuthInvalidToken | Self::AuthRequired | Self::InternalError)
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ValidationFailed => "request validation failed",
            Self::AuthInvalidToken => "invalid authentication token",
            Self::AuthRequired => "connection is not authenticated",
            Self::NotFound => "requested resource not found",
            Self::NotGroupHost => "only the group host can do that",
            Self::AlreadyInGroup => "user is already in a group",
            Self::NotInGroup => "you are not in a group",
            Self::UpstreamTimeout => "upstream service timed out",
            Self::UpstreamUnavailable => "upstream service is unavailable",
            Self::InternalError => "internal server error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayError {
    code: ErrorCode,
    message: String,
    details: Value,
    request_id: Option<String>,
}

impl RelayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: Value::Null, request_id: None }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &Value {
        &self.details
    }

    pub fn is_fatal(&self) -> bool {
        self.code.fatal()
    }

    /// Client-visible event for this error: `fatal_error` for fatal codes,
    /// `error` otherwise.
    pub fn to_event(&self) -> ServerEvent {
        if self.is_fatal() {
            ServerEvent::FatalError {
                code: self.code.as_str().to_string(),
                message: self.message.clone(),
            }
        } else {
            ServerEvent::Error {
                code: self.code.as_str().to_string(),
                message: self.message.clone(),
                retryable: self.code.retryable(),
                details: self.details.clone(),
            }
        }
    }
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for RelayError {}

impl From<StoreError> for RelayError {
    fn from(error: StoreError) -> Self {
        tracing::error!(error = %error, "timeline store operation failed");
        Self::from_code(ErrorCode::InternalError)
    }
}

impl From<AuthError> for RelayError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::InvalidToken(reason) => {
                Self::from_code(ErrorCode::AuthInvalidToken).with_details(json!({ "reason": reason }))
            }
            AuthError::Timeout => Self::from_code(ErrorCode::UpstreamTimeout),
            AuthError::Upstream(reason) => Self::from_code(ErrorCode::UpstreamUnavailable)
                .with_details(json!({ "reason": reason })),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let request_id = self.request_id.or_else(current_request_id);
        let details = if self.details.is_null() { json!({}) } else { self.details };

        let mut response = (
            self.code.status(),
            Json(json!({
                "error": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "retryable": self.code.retryable(),
                    "request_id": request_id.clone(),
                    "details": details,
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
    use cowatch_common::protocol::ws::ServerEvent;
    use serde_json::Value;

    use super::{with_request_id_scope, ErrorCode, RelayError};
    use crate::auth::AuthError;

    #[tokio::test]
    async fn relay_error_uses_scoped_request_id() {
        let response = with_request_id_scope("req-scoped-123".to_owned(), async {
            RelayError::from_code(ErrorCode::InternalError).into_response()
        })
        .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("error response body should be readable");
        let parsed: Value =
            serde_json::from_slice(&body).expect("error response body should be valid json");

        assert_eq!(parsed["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(parsed["error"]["retryable"], true);
        assert_eq!(parsed["error"]["request_id"], "req-scoped-123");
        assert_eq!(parsed["error"]["details"], serde_json::json!({}));
    }

    #[test]
    fn authority_error_is_recoverable() {
        let error = RelayError::from_code(ErrorCode::NotGroupHost);
        assert!(!error.is_fatal());
        match error.to_event() {
            ServerEvent::Error { code, retryable, .. } => {
                assert_eq!(code, "NOT_GROUP_HOST");
                assert!(!retryable);
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[test]
    fn auth_and_internal_errors_are_fatal() {
        for error_code in
            [ErrorCode::AuthInvalidToken, ErrorCode::AuthRequired, ErrorCode::InternalError]
        {
            let event = RelayError::from_code(error_code).to_event();
            assert!(
                matches!(event, ServerEvent::FatalError { ref code, .. } if code == error_code.as_str()),
                "{error_code:?} should map to fatal_error"
            );
        }
    }

    #[test]
    fn auth_error_mapping() {
        assert_eq!(
            RelayError::from(AuthError::InvalidToken("expired".into())).code(),
            ErrorCode::AuthInvalidToken
        );
        assert_eq!(RelayError::from(AuthError::Timeout).code(), ErrorCode::UpstreamTimeout);
        assert_eq!(
            RelayError::from(AuthError::Upstream("502".into())).code(),
            ErrorCode::UpstreamUnavailable
        );
    }

    #[tokio::test]
    async fn custom_details_are_preserved() {
        let response = RelayError::new(ErrorCode::ValidationFailed, "bad payload")
            .with_details(serde_json::json!({ "field": "video_id" }))
            .into_response();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("error response body should be readable");
        let parsed: Value =
            serde_json::from_slice(&body).expect("error response body should be valid json");
        assert_eq!(parsed["error"]["details"]["field"], "video_id");
    }

    #[tokio::test]
    async fn explicit_request_id_overrides_scope() {
        let response = with_request_id_scope("req-scoped-123".to_owned(), async {
            RelayError::from_code(ErrorCode::NotFound)
                .with_request_id("req-explicit-456")
                .into_response()
        })
        .await;

        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("error response body should be readable");
        let parsed: Value =
            serde_json::from_slice(&body).expect("error response body should be valid json");
        assert_eq!(parsed["error"]["request_id"], "req-explicit-456");
    }
}
