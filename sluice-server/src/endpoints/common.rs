//! Facilities shared by all endpoints.

use std::error::Error;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// The body of every error response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// The error message.
    pub detail: String,
    /// Messages of the errors that caused this one, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl ApiErrorResponse {
    /// Creates an error response with a detail message.
    pub fn with_detail(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            causes: Vec::new(),
        }
    }

    /// Creates an error response from an error and its sources.
    pub fn from_error(error: &(dyn Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            detail: error.to_string(),
            causes,
        }
    }
}

/// An error that rejects a request to the publish endpoint.
#[derive(Debug, thiserror::Error)]
pub enum BadPublishRequest {
    /// The topic contains empty segments.
    #[error("invalid topic name {0:?}")]
    InvalidTopic(String),

    /// The body is not valid JSON.
    #[error("invalid JSON data")]
    InvalidJson(#[source] serde_json::Error),
}

impl IntoResponse for BadPublishRequest {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse::from_error(&self);
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_with_causes() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error = BadPublishRequest::InvalidJson(json_error);

        let response = ApiErrorResponse::from_error(&error);
        assert_eq!(response.detail, "invalid JSON data");
        assert_eq!(
            response.causes,
            ["EOF while parsing an object at line 1 column 1"]
        );
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ApiErrorResponse::with_detail("not found");
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"detail":"not found"}"#
        );
    }
}
