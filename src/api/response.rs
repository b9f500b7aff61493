//! Response types for the Billing Engine API.
//!
//! This module defines the error response structures and the mapping from
//! engine errors to HTTP statuses.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{BillingPeriodStatus, ProcessingProgress};

/// API error response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional details about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    /// Creates a new API error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Creates a new API error with details.
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Some(details.into()),
        }
    }

    /// Creates a malformed JSON error response.
    pub fn malformed_json(message: impl Into<String>) -> Self {
        Self::new("MALFORMED_JSON", message)
    }

    /// Creates a malformed query string error response.
    pub fn malformed_query(message: impl Into<String>) -> Self {
        Self::new("MALFORMED_QUERY", message)
    }
}

/// API error with HTTP status code.
pub struct ApiErrorResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The error body.
    pub error: ApiError,
}

impl ApiErrorResponse {
    /// A 400 response.
    pub fn bad_request(error: ApiError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error,
        }
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, "application/json")],
            Json(self.error),
        )
            .into_response()
    }
}

impl From<EngineError> for ApiErrorResponse {
    fn from(error: EngineError) -> Self {
        let (status, details) = match &error {
            EngineError::InvalidTransition { .. } => (
                StatusCode::CONFLICT,
                "The billing period is not in a status that allows this operation",
            ),
            EngineError::InvalidCharge { .. } => (
                StatusCode::BAD_REQUEST,
                "The charge data violates a charge invariant",
            ),
            EngineError::InvalidSpan { .. } => (
                StatusCode::BAD_REQUEST,
                "The end of a date span must be after its start",
            ),
            EngineError::InvalidPeriod { .. } => (
                StatusCode::BAD_REQUEST,
                "The billing period data is invalid",
            ),
            EngineError::ConcurrentModification { .. } => (
                StatusCode::CONFLICT,
                "Another operation changed the billing period first; retry later",
            ),
            EngineError::SourceFailure { .. } => (
                StatusCode::BAD_GATEWAY,
                "An activity source failed; the period stays processing and can be retried",
            ),
            EngineError::ExportFailure { .. } => (
                StatusCode::BAD_GATEWAY,
                "The export could not be written; the period stays completed",
            ),
            EngineError::ChargeLocked { .. } => (
                StatusCode::CONFLICT,
                "Charges can only be amended while the period is draft or processing",
            ),
            EngineError::PeriodNotFound { .. }
            | EngineError::ChargeNotFound { .. }
            | EngineError::ExportNotFound { .. } => (
                StatusCode::NOT_FOUND,
                "The requested resource does not exist",
            ),
            EngineError::ConfigNotFound { .. } | EngineError::ConfigParseError { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "The engine configuration could not be loaded",
            ),
            EngineError::Store { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "The billing store failed",
            ),
        };

        ApiErrorResponse {
            status,
            error: ApiError::with_details(error.code(), error.to_string(), details),
        }
    }
}

/// Body of `GET /periods/:id/progress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressResponse {
    /// The billing period.
    pub period_id: Uuid,
    /// Current status of the period.
    pub status: BillingPeriodStatus,
    /// Progress of the latest run, if any.
    pub progress: Option<ProcessingProgress>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_serialization() {
        let error = ApiError::new("TEST_ERROR", "Test message");
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("\"code\":\"TEST_ERROR\""));
        assert!(json.contains("\"message\":\"Test message\""));
        assert!(!json.contains("details"));
    }

    #[test]
    fn test_invalid_transition_is_conflict() {
        let api_error: ApiErrorResponse = EngineError::InvalidTransition {
            period_id: Uuid::nil(),
            from: BillingPeriodStatus::Completed,
            to: BillingPeriodStatus::Processing,
        }
        .into();
        assert_eq!(api_error.status, StatusCode::CONFLICT);
        assert_eq!(api_error.error.code, "INVALID_TRANSITION");
        assert!(api_error.error.message.contains("completed -> processing"));
    }

    #[test]
    fn test_not_found_statuses() {
        let api_error: ApiErrorResponse = EngineError::ChargeNotFound {
            charge_id: Uuid::nil(),
        }
        .into();
        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert_eq!(api_error.error.code, "CHARGE_NOT_FOUND");
    }

    #[test]
    fn test_source_failure_is_bad_gateway() {
        let api_error: ApiErrorResponse = EngineError::SourceFailure {
            source_name: "transport".to_string(),
            cause: "timed out".to_string(),
        }
        .into();
        assert_eq!(api_error.status, StatusCode::BAD_GATEWAY);
        assert!(api_error.error.message.contains("transport"));
    }
}
