use hyper::StatusCode;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Payload too large")]
    PayloadTooLarge,
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("Bad gateway: {0}")]
    Upstream(String),
    #[error("Gateway timeout")]
    Timeout,
    #[error("Invalid URI: {0}")]
    InvalidUri(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::InvalidUri(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to clients. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidUri(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Upstream(_) => "Upstream service unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl warp::reject::Reject for GatewayError {}

/// Uniform JSON error envelope.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: "error",
            status_code: code.as_u16(),
            message: message.into(),
        }
    }
}
