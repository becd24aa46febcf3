// ---------------------------------------------------------------------------
// Response envelope & gateway error taxonomy
// ---------------------------------------------------------------------------
// Every gateway-originated response (platform routes, dispatcher errors) is a
// single JSON shape. Upstream passthrough responses skip the envelope.

use axum::Json;
use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Uniform success/error wrapper returned by the platform surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ResponseEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub response_headers: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ResponseEnvelope {
    pub fn success(status: u16, data: Value) -> Self {
        Self {
            status_code: Some(status),
            response: Some(data),
            ..Default::default()
        }
    }

    pub fn success_message(status: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn error(status: u16, code: &str, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status),
            error_code: Some(code.to_string()),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Record the correlation id under `response_headers.request_id`.
    pub fn with_request_id(mut self, request_id: &str) -> Self {
        self.response_headers
            .get_or_insert_with(Map::new)
            .insert("request_id".to_string(), json!(request_id));
        self
    }
}

impl IntoResponse for ResponseEnvelope {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code.unwrap_or(200))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------
// Namespaces: GTW gateway, API permission, AUTH authentication, REQ request
// shape, VAL validation.

pub mod codes {
    pub const ENDPOINT_NOT_FOUND: &str = "GTW001";
    pub const NOT_SUBSCRIBED: &str = "GTW002";
    pub const API_NOT_FOUND: &str = "GTW003";
    pub const MISSING_VERSION_HEADER: &str = "GTW004";
    pub const UPSTREAM_EXHAUSTED: &str = "GTW006";
    pub const INSUFFICIENT_CREDITS: &str = "GTW010";
    pub const UNKNOWN_GRPC_METHOD: &str = "GTW011";
    pub const GRPC_GENERATION_FAILED: &str = "GTW012";
    pub const PATH_VALIDATION: &str = "GTW013";
    pub const HTTP_EXCEPTION: &str = "GTW998";
    pub const UNEXPECTED: &str = "GTW999";
    pub const PERMISSION_DENIED: &str = "API007";
    pub const ROLE_NOT_FOUND: &str = "API008";
    pub const AUTH_REQUIRED: &str = "AUTH001";
    pub const REQUEST_TOO_LARGE: &str = "REQ002";
    pub const REQUEST_FILE_TYPE: &str = "REQ003";
    pub const RATE_LIMITED: &str = "REQ004";
    pub const VALIDATION: &str = "VAL001";
}

/// Centralized error type for handlers and dispatchers. Converts into the
/// response envelope; never panics the process.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Role not found: {0}")]
    RoleNotFound(String),

    #[error("API not found: {0}")]
    ApiNotFound(String),

    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("Not subscribed to API: {0}")]
    NotSubscribed(String),

    #[error("Missing X-API-Version header")]
    MissingVersionHeader,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Wrong file type: {0}")]
    FileType(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded")]
    RateLimited {
        limit: u64,
        remaining: u64,
        reset_in: u64,
    },

    #[error("Insufficient credits for group {0}")]
    InsufficientCredits(String),

    #[error("All upstream servers failed: {0}")]
    UpstreamExhausted(String),

    #[error("Unknown gRPC method: {0}")]
    UnknownGrpcMethod(String),

    #[error("Proto compilation failed: {0}")]
    ProtoCompile(String),

    #[error("Path validation failed: {0}")]
    PathValidation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::PermissionDenied(_) | GatewayError::NotSubscribed(_) => {
                StatusCode::FORBIDDEN
            }
            GatewayError::RoleNotFound(_) => StatusCode::FORBIDDEN,
            GatewayError::ApiNotFound(_)
            | GatewayError::EndpointNotFound(_)
            | GatewayError::NotFound(_)
            | GatewayError::UnknownGrpcMethod(_) => StatusCode::NOT_FOUND,
            GatewayError::MissingVersionHeader
            | GatewayError::Validation(_)
            | GatewayError::BadRequest(_)
            | GatewayError::FileType(_)
            | GatewayError::PathValidation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::InsufficientCredits(_) => StatusCode::PAYMENT_REQUIRED,
            GatewayError::UpstreamExhausted(_) => StatusCode::BAD_GATEWAY,
            GatewayError::ProtoCompile(_)
            | GatewayError::Store(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Auth(_) => codes::AUTH_REQUIRED,
            GatewayError::PermissionDenied(_) => codes::PERMISSION_DENIED,
            GatewayError::RoleNotFound(_) => codes::ROLE_NOT_FOUND,
            GatewayError::ApiNotFound(_) => codes::API_NOT_FOUND,
            GatewayError::EndpointNotFound(_) => codes::ENDPOINT_NOT_FOUND,
            GatewayError::NotSubscribed(_) => codes::NOT_SUBSCRIBED,
            GatewayError::MissingVersionHeader => codes::MISSING_VERSION_HEADER,
            GatewayError::Validation(_) => codes::VALIDATION,
            GatewayError::BadRequest(_) | GatewayError::Conflict(_) | GatewayError::NotFound(_) => {
                codes::HTTP_EXCEPTION
            }
            GatewayError::FileType(_) => codes::REQUEST_FILE_TYPE,
            GatewayError::RateLimited { .. } => codes::RATE_LIMITED,
            GatewayError::InsufficientCredits(_) => codes::INSUFFICIENT_CREDITS,
            GatewayError::UpstreamExhausted(_) => codes::UPSTREAM_EXHAUSTED,
            GatewayError::UnknownGrpcMethod(_) => codes::UNKNOWN_GRPC_METHOD,
            GatewayError::ProtoCompile(_) => codes::GRPC_GENERATION_FAILED,
            GatewayError::PathValidation(_) => codes::PATH_VALIDATION,
            GatewayError::Store(_) | GatewayError::Internal(_) => codes::UNEXPECTED,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();

        tracing::error!(
            code = self.error_code(),
            "gateway error ({}): {}",
            status.as_u16(),
            self
        );

        let envelope =
            ResponseEnvelope::error(status.as_u16(), self.error_code(), self.to_string());
        let mut response = (status, Json(envelope)).into_response();

        if let GatewayError::RateLimited {
            limit,
            remaining,
            reset_in,
        } = self
        {
            let headers = response.headers_mut();
            headers.insert("Retry-After", header_num(reset_in));
            headers.insert("X-RateLimit-Limit", header_num(limit));
            headers.insert("X-RateLimit-Remaining", header_num(remaining));
            headers.insert("X-RateLimit-Reset", header_num(reset_in));
        }

        response
    }
}

fn header_num(n: u64) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or(HeaderValue::from_static("0"))
}

impl From<crate::store::StoreError> for GatewayError {
    fn from(err: crate::store::StoreError) -> Self {
        GatewayError::Store(err.to_string())
    }
}

impl From<crate::passwords::PasswordError> for GatewayError {
    fn from(err: crate::passwords::PasswordError) -> Self {
        GatewayError::Internal(err.to_string())
    }
}

impl From<crate::tokens::TokenError> for GatewayError {
    fn from(_: crate::tokens::TokenError) -> Self {
        GatewayError::Auth("invalid or expired token".into())
    }
}

impl From<crate::store::snapshot::SnapshotError> for GatewayError {
    fn from(err: crate::store::snapshot::SnapshotError) -> Self {
        match err {
            crate::store::snapshot::SnapshotError::MissingKey => {
                GatewayError::BadRequest(err.to_string())
            }
            other => GatewayError::Internal(other.to_string()),
        }
    }
}
