//! Error handling and JSON error responses for the bridge

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Error codes for bridge errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeErrorCode {
    /// No enabled service claims the request path
    RouteNotFound,
    /// Upstream call exceeded its deadline
    UpstreamTimeout,
    /// Connection-level failure reaching the upstream
    UpstreamUnreachable,
    /// Any other failure while forwarding
    UpstreamUnexpected,
    /// Registration body is missing required fields
    ValidationError,
    /// Request body is not valid JSON for the endpoint
    InvalidJson,
    /// Referenced service id does not exist
    NotFound,
    /// Admin authorization check failed
    Unauthorized,
    /// Method not supported on the proxy path
    MethodNotAllowed,
    /// Internal bridge error
    InternalError,
}

impl BridgeErrorCode {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeErrorCode::RouteNotFound => StatusCode::NOT_FOUND,
            BridgeErrorCode::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            BridgeErrorCode::UpstreamUnreachable => StatusCode::BAD_GATEWAY,
            BridgeErrorCode::UpstreamUnexpected => StatusCode::INTERNAL_SERVER_ERROR,
            BridgeErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            BridgeErrorCode::InvalidJson => StatusCode::BAD_REQUEST,
            BridgeErrorCode::NotFound => StatusCode::NOT_FOUND,
            BridgeErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            BridgeErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            BridgeErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code as a string for the X-Bridge-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            BridgeErrorCode::RouteNotFound => "ROUTE_NOT_FOUND",
            BridgeErrorCode::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            BridgeErrorCode::UpstreamUnreachable => "UPSTREAM_UNREACHABLE",
            BridgeErrorCode::UpstreamUnexpected => "UPSTREAM_UNEXPECTED",
            BridgeErrorCode::ValidationError => "VALIDATION_ERROR",
            BridgeErrorCode::InvalidJson => "INVALID_JSON",
            BridgeErrorCode::NotFound => "NOT_FOUND",
            BridgeErrorCode::Unauthorized => "UNAUTHORIZED",
            BridgeErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            BridgeErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Failure of a single forwarding attempt
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("upstream timed out")]
    Timeout,

    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    #[error("unexpected upstream failure: {0}")]
    Unexpected(String),
}

impl ForwardError {
    pub fn code(&self) -> BridgeErrorCode {
        match self {
            ForwardError::Timeout => BridgeErrorCode::UpstreamTimeout,
            ForwardError::Unreachable(_) => BridgeErrorCode::UpstreamUnreachable,
            ForwardError::Unexpected(_) => BridgeErrorCode::UpstreamUnexpected,
        }
    }

    /// Message returned to the caller. Upstream details stay in the log.
    pub fn public_message(&self) -> &'static str {
        match self {
            ForwardError::Timeout => "Gateway timeout",
            ForwardError::Unreachable(_) => "Bad gateway",
            ForwardError::Unexpected(_) => "Internal server error",
        }
    }
}

impl From<reqwest::Error> for ForwardError {
    fn from(err: reqwest::Error) -> Self {
        // Connect timeouts report both flags; they count as timeouts.
        if err.is_timeout() {
            ForwardError::Timeout
        } else if err.is_connect() {
            ForwardError::Unreachable(err.to_string())
        } else {
            ForwardError::Unexpected(err.to_string())
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"error":"{}"}}"#, self.error.replace('\"', "\\\""))
        })
    }
}

/// Create a JSON error response with X-Bridge-Error header
pub fn json_error_response(
    code: BridgeErrorCode,
    message: impl Into<String>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let body = ErrorResponse::new(message).to_json();

    Response::builder()
        .status(code.status_code())
        .header("Content-Type", "application/json")
        .header("X-Bridge-Error", code.as_header_value())
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}
