use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::time::Duration;

/// Shown to clients whenever the numbers cannot be produced right now.
pub const UNAVAILABLE_MESSAGE: &str = "analytics temporarily unavailable";

/// Failure reported by a raw data source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("malformed series: {0}")]
    MalformedSeries(String),

    #[error("fetch error: {0}")]
    Fetch(#[from] SourceError),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("fetch cancelled")]
    Cancelled,

    #[error("analytics service has not been started")]
    NotStarted,

    #[error("analytics service has been destroyed")]
    Destroyed,
}

impl IntoResponse for AnalyticsError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AnalyticsError::InvalidQuery(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AnalyticsError::MalformedSeries(msg) => {
                tracing::error!(error = %msg, "rejected malformed series from source");
                (StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_MESSAGE.to_string())
            }
            AnalyticsError::Fetch(e) => {
                tracing::error!(error = %e, "analytics fetch failed");
                (StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_MESSAGE.to_string())
            }
            AnalyticsError::Timeout(after) => {
                tracing::error!(timeout_ms = after.as_millis() as u64, "analytics fetch timed out");
                (StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_MESSAGE.to_string())
            }
            AnalyticsError::Cancelled | AnalyticsError::NotStarted | AnalyticsError::Destroyed => {
                tracing::warn!(error = %self, "analytics request abandoned");
                (StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_MESSAGE.to_string())
            }
        };

        let body = json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;
