//! Control API error responses

use crate::ban::BanError;
use crate::core::error::Error;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Required query parameter absent or empty
    #[error("Missing '{0}' query parameter")]
    MissingParam(&'static str),

    /// Input present but rejected by validation
    #[error("{message}")]
    Invalid {
        ip: Option<String>,
        message: String,
    },

    /// Target overlaps the whitelist
    #[error("{0} is whitelisted")]
    Whitelisted(String),

    /// Rule-set operation on one target failed
    #[error("operation on {ip} failed: {source}")]
    Target {
        ip: String,
        #[source]
        source: Error,
    },

    /// Operation not tied to one target failed
    #[error(transparent)]
    Core(#[from] Error),

    /// Proxied request could not reach the ban service
    #[error("Failed to forward request: {0}")]
    Forward(#[from] BanError),
}

impl ApiError {
    pub fn invalid(ip: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            ip: Some(ip.into()),
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingParam(_) | ApiError::Invalid { .. } => StatusCode::BAD_REQUEST,
            ApiError::Whitelisted(_) => StatusCode::FORBIDDEN,
            ApiError::Target { .. } | ApiError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Forward(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::MissingParam(_) => json!({ "error": self.to_string() }),
            ApiError::Invalid { ip, message } => match ip {
                Some(ip) => json!({ "ip": ip, "error": message }),
                None => json!({ "error": message }),
            },
            ApiError::Whitelisted(ip) => json!({
                "ip": ip,
                "status": "whitelisted",
                "error": self.to_string(),
            }),
            ApiError::Target { ip, source } => {
                let mut body = json!({
                    "ip": ip,
                    "status": "failed",
                    "error": source.to_string(),
                });
                if let Some(translation) = source.translation() {
                    body["hint"] = json!(translation.user_message);
                }
                body
            }
            ApiError::Core(source) => {
                let mut body = json!({ "error": source.to_string() });
                if let Some(translation) = source.translation() {
                    body["hint"] = json!(translation.user_message);
                }
                body
            }
            ApiError::Forward(source) => json!({
                "error": "Failed to forward request",
                "detail": source.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}
