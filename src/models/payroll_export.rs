//! Payroll export models.
//!
//! A [`PayrollExport`] records one attempt to hand a completed billing
//! period's charges to payroll. The record is created Pending and moves to
//! exactly one terminal status.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

use super::ChargeType;

/// Status of a payroll export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    /// Created, artifact not yet written.
    Pending,
    /// Artifact written successfully.
    Completed,
    /// Serialization or write failed.
    Failed,
}

impl ExportStatus {
    /// Returns true if no further changes are allowed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExportStatus::Pending)
    }
}

/// Serialization format of an export artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Comma-separated values.
    #[default]
    Csv,
    /// Tab-separated values with a byte-order mark, opened directly by Excel.
    Excel,
    /// JSON document with per-staff summaries.
    Json,
}

impl ExportFormat {
    /// File extension used for artifacts in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Excel => "tsv",
            ExportFormat::Json => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Excel => "excel",
            ExportFormat::Json => "json",
        })
    }
}

/// One generated export artifact for a billing period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollExport {
    /// Unique identifier.
    pub id: Uuid,
    /// The exported billing period.
    pub billing_period_id: Uuid,
    /// The payroll date the export is for.
    pub export_date: NaiveDate,
    /// Name of the written artifact.
    pub file_name: String,
    /// Number of charges in the artifact.
    pub record_count: u64,
    /// Sum of the exported charge amounts.
    pub total_amount: Decimal,
    /// Current status.
    pub status: ExportStatus,
    /// Artifact format.
    pub format: ExportFormat,
    /// Artifact size in bytes, once written.
    #[serde(default)]
    pub file_size: Option<u64>,
    /// Why the export failed.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// When the export was created.
    pub created_at: DateTime<Utc>,
    /// When the export last changed status.
    pub updated_at: DateTime<Utc>,
}

impl PayrollExport {
    /// Creates a Pending export.
    pub fn pending(
        billing_period_id: Uuid,
        export_date: NaiveDate,
        file_name: impl Into<String>,
        format: ExportFormat,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            billing_period_id,
            export_date,
            file_name: file_name.into(),
            record_count: 0,
            total_amount: Decimal::ZERO,
            status: ExportStatus::Pending,
            format,
            file_size: None,
            error_message: None,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// Marks the export Completed.
    pub fn complete(mut self, file_size: u64, now: DateTime<Utc>) -> EngineResult<Self> {
        self.ensure_pending()?;
        self.status = ExportStatus::Completed;
        self.file_size = Some(file_size);
        self.updated_at = now;
        Ok(self)
    }

    /// Marks the export Failed with a reason.
    pub fn fail(mut self, message: impl Into<String>, now: DateTime<Utc>) -> EngineResult<Self> {
        self.ensure_pending()?;
        self.status = ExportStatus::Failed;
        self.error_message = Some(message.into());
        self.updated_at = now;
        Ok(self)
    }

    fn ensure_pending(&self) -> EngineResult<()> {
        if self.status.is_terminal() {
            return Err(EngineError::ExportFailure {
                export_id: self.id,
                message: format!("export is already {:?}", self.status).to_lowercase(),
            });
        }
        Ok(())
    }
}

/// Charges of one staff member within an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffSummary {
    /// The staff member.
    pub staff_id: String,
    /// Number of charges.
    pub charge_count: u64,
    /// Summed amounts per charge type.
    pub by_type: BTreeMap<ChargeType, Decimal>,
    /// Sum of all amounts.
    pub total_amount: Decimal,
}
