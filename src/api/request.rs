//! Request types for the Billing Engine API.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::ExportFormat;

/// Request body for `POST /periods`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePeriodRequest {
    /// Operator-facing name, unique among non-cancelled periods.
    pub name: String,
    /// First day of the period.
    pub start_date: NaiveDate,
    /// Last day of the period.
    pub end_date: NaiveDate,
}

/// Request body for `PATCH /periods/:id/dates`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReschedulePeriodRequest {
    /// New first day.
    pub start_date: NaiveDate,
    /// New last day.
    pub end_date: NaiveDate,
}

/// Request body for `POST /periods/:id/export`.
///
/// The body may be omitted; the configured format and today's date are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportRequest {
    /// Artifact format.
    pub format: Option<ExportFormat>,
    /// Payroll export date, on or after the period's end date.
    pub export_date: Option<NaiveDate>,
}
