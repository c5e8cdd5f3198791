//! API error handling
//!
//! Every handler returns `Result<_, ApiError>`; this module turns the error
//! into a status code and a uniform JSON body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use uuid::Uuid;

use extract::ExtractError;
use ingest::IngestError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Diagnostics>,
}

/// Raw upstream text and parse error, only attached in diagnostics mode.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Diagnostics {
    pub raw_output: String,
    pub parse_error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    UnsupportedMediaType(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("Model output was not a flat JSON object: {reason}")]
    MalformedOutput {
        reason: String,
        details: Option<Diagnostics>,
    },

    #[error("External service error: {0}")]
    Upstream(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),
}

impl ApiError {
    /// Map an extraction failure, attaching diagnostics only when enabled.
    pub fn from_extract(err: ExtractError, diagnostics: bool) -> Self {
        match err {
            ExtractError::Normalize(e) => ApiError::MalformedOutput {
                reason: e.reason().to_string(),
                details: diagnostics.then(|| Diagnostics {
                    raw_output: e.raw_text().to_string(),
                    parse_error: e.reason().to_string(),
                }),
            },
            ExtractError::Upstream(e) => ApiError::Upstream(format!("{e:#}")),
            e @ (ExtractError::GeminiNotConfigured | ExtractError::DocumentAiNotConfigured) => {
                ApiError::NotConfigured(e.to_string())
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::MalformedOutput { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::UnsupportedMediaType(_) => "unsupported_media_type",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::MalformedOutput { .. } => "malformed_output",
            ApiError::Upstream(_) => "external_service_error",
            ApiError::NotConfigured(_) => "not_configured",
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Empty => ApiError::BadRequest(err.to_string()),
            IngestError::TooLarge { .. } => ApiError::PayloadTooLarge(err.to_string()),
            IngestError::Unsupported(_) => ApiError::UnsupportedMediaType(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();
        let request_id = Uuid::new_v4().to_string();

        if status.is_server_error() {
            tracing::error!(
                error_type = error_type,
                status = status.as_u16(),
                request_id = %request_id,
                message = %self,
                "API error"
            );
        } else {
            tracing::warn!(
                error_type = error_type,
                status = status.as_u16(),
                request_id = %request_id,
                message = %self,
                "Rejected request"
            );
        }

        let message = self.to_string();
        let details = match self {
            ApiError::MalformedOutput { details, .. } => details,
            _ => None,
        };

        (
            status,
            Json(ErrorResponse {
                error: error_type.to_string(),
                message,
                request_id,
                details,
            }),
        )
            .into_response()
    }
}
