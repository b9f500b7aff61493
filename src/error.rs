//! Error types for the Billing Engine.
//!
//! This module provides strongly-typed errors using the `thiserror` crate
//! for all error conditions that can occur while processing billing periods.

use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::models::BillingPeriodStatus;

/// The main error type for the Billing Engine.
///
/// Every failure is scoped to a single billing period and is reported to the
/// immediate caller. None of them are fatal to the process.
///
/// # Example
///
/// ```
/// use billing_engine::error::EngineError;
///
/// let error = EngineError::ConfigNotFound {
///     path: "/missing/engine.yaml".to_string(),
/// };
/// assert_eq!(error.to_string(), "Configuration file not found: /missing/engine.yaml");
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    /// A status transition was requested from an incompatible status.
    #[error("Invalid transition for billing period {period_id}: {from} -> {to}")]
    InvalidTransition {
        /// The billing period the transition was requested for.
        period_id: Uuid,
        /// The persisted status at the time of the request.
        from: BillingPeriodStatus,
        /// The requested status.
        to: BillingPeriodStatus,
    },

    /// A charge violated one of its invariants.
    #[error("Invalid charge field '{field}': {message}")]
    InvalidCharge {
        /// The field whose invariant was violated.
        field: String,
        /// A description of the violated invariant.
        message: String,
    },

    /// A date span had an end on or before its start.
    #[error("Invalid span: end {end} is not after start {start}")]
    InvalidSpan {
        /// The start of the span.
        start: NaiveDate,
        /// The end of the span.
        end: NaiveDate,
    },

    /// A billing period definition was invalid.
    #[error("Invalid billing period: {message}")]
    InvalidPeriod {
        /// A description of the violated invariant.
        message: String,
    },

    /// An optimistic concurrency check was lost.
    #[error("Concurrent modification of billing period {period_id}: {message}")]
    ConcurrentModification {
        /// The contended billing period.
        period_id: Uuid,
        /// What the losing attempt observed.
        message: String,
    },

    /// An activity source could not be reached or returned malformed data.
    #[error("Activity source '{source_name}' failed: {cause}")]
    SourceFailure {
        /// The name of the failing source.
        source_name: String,
        /// What went wrong.
        cause: String,
    },

    /// Serializing or writing a payroll export failed.
    #[error("Payroll export {export_id} failed: {message}")]
    ExportFailure {
        /// The export record that was marked failed.
        export_id: Uuid,
        /// What went wrong.
        message: String,
    },

    /// A charge was amended after its billing period left Processing.
    #[error("Charge {charge_id} is locked: billing period is {status}")]
    ChargeLocked {
        /// The charge that could not be amended.
        charge_id: Uuid,
        /// The status of the owning billing period.
        status: BillingPeriodStatus,
    },

    /// The billing period does not exist.
    #[error("Billing period not found: {period_id}")]
    PeriodNotFound {
        /// The missing billing period.
        period_id: Uuid,
    },

    /// The charge does not exist.
    #[error("Charge not found: {charge_id}")]
    ChargeNotFound {
        /// The missing charge.
        charge_id: Uuid,
    },

    /// The payroll export does not exist.
    #[error("Payroll export not found: {export_id}")]
    ExportNotFound {
        /// The missing export.
        export_id: Uuid,
    },

    /// Configuration file was not found at the specified path.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        /// The path that was not found.
        path: String,
    },

    /// Configuration file could not be parsed.
    #[error("Failed to parse configuration file '{path}': {message}")]
    ConfigParseError {
        /// The path to the file that failed to parse.
        path: String,
        /// A description of the parse error.
        message: String,
    },

    /// The durable store failed.
    #[error("Store error: {message}")]
    Store {
        /// A description of the store failure.
        message: String,
    },
}

impl EngineError {
    /// Returns a stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::InvalidCharge { .. } => "INVALID_CHARGE",
            EngineError::InvalidSpan { .. } => "INVALID_SPAN",
            EngineError::InvalidPeriod { .. } => "INVALID_PERIOD",
            EngineError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            EngineError::SourceFailure { .. } => "SOURCE_FAILURE",
            EngineError::ExportFailure { .. } => "EXPORT_FAILURE",
            EngineError::ChargeLocked { .. } => "CHARGE_LOCKED",
            EngineError::PeriodNotFound { .. } => "PERIOD_NOT_FOUND",
            EngineError::ChargeNotFound { .. } => "CHARGE_NOT_FOUND",
            EngineError::ExportNotFound { .. } => "EXPORT_NOT_FOUND",
            EngineError::ConfigNotFound { .. } | EngineError::ConfigParseError { .. } => {
                "CONFIG_ERROR"
            }
            EngineError::Store { .. } => "STORE_ERROR",
        }
    }

    pub(crate) fn invalid_charge(field: &str, message: impl Into<String>) -> Self {
        EngineError::InvalidCharge {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// A type alias for Results that return EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_displays_statuses() {
        let period_id = Uuid::nil();
        let error = EngineError::InvalidTransition {
            period_id,
            from: BillingPeriodStatus::Completed,
            to: BillingPeriodStatus::Processing,
        };
        assert_eq!(
            error.to_string(),
            format!(
                "Invalid transition for billing period {}: completed -> processing",
                period_id
            )
        );
    }

    #[test]
    fn test_invalid_charge_displays_field_and_message() {
        let error = EngineError::invalid_charge("amount", "must be greater than zero");
        assert_eq!(
            error.to_string(),
            "Invalid charge field 'amount': must be greater than zero"
        );
    }

    #[test]
    fn test_invalid_span_displays_dates() {
        let error = EngineError::InvalidSpan {
            start: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid span: end 2024-01-01 is not after start 2024-01-31"
        );
    }

    #[test]
    fn test_source_failure_displays_source_and_cause() {
        let error = EngineError::SourceFailure {
            source_name: "transport".to_string(),
            cause: "timed out after 5000ms".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Activity source 'transport' failed: timed out after 5000ms"
        );
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            EngineError::ChargeLocked {
                charge_id: Uuid::nil(),
                status: BillingPeriodStatus::Exported,
            }
            .code(),
            "CHARGE_LOCKED"
        );
        assert_eq!(
            EngineError::ConfigParseError {
                path: "x".to_string(),
                message: "y".to_string(),
            }
            .code(),
            "CONFIG_ERROR"
        );
    }

    #[test]
    fn test_errors_implement_std_error() {
        fn assert_error<T: std::error::Error + Send + Sync + 'static>() {}
        assert_error::<EngineError>();
    }

    #[test]
    fn test_error_propagation_with_question_mark() {
        fn returns_not_found() -> EngineResult<()> {
            Err(EngineError::PeriodNotFound {
                period_id: Uuid::nil(),
            })
        }

        fn propagates_error() -> EngineResult<()> {
            returns_not_found()?;
            Ok(())
        }

        assert!(propagates_error().is_err());
    }
}
