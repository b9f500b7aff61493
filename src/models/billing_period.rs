//! Billing period model.
//!
//! This module contains the [`BillingPeriod`] type and its lifecycle status.
//! Status changes are applied through the state machine in
//! [`crate::engine::BillingPeriodStateMachine`]; this module only knows how a
//! period looks and which date invariants it must hold.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calculation::DateSpan;
use crate::error::{EngineError, EngineResult};

/// Lifecycle status of a billing period.
///
/// # Example
///
/// ```
/// use billing_engine::models::BillingPeriodStatus;
///
/// assert_eq!(BillingPeriodStatus::Draft.to_string(), "draft");
/// assert!(BillingPeriodStatus::Processing.allows_charge_amendment());
/// assert!(!BillingPeriodStatus::Completed.allows_charge_amendment());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriodStatus {
    /// Created by an operator, not yet processed.
    Draft,
    /// Charge generation is running or has halted on a source failure.
    Processing,
    /// All activity sources were consumed.
    Completed,
    /// A payroll export was produced.
    Exported,
    /// Withdrawn by an operator. Can be reactivated back to Draft.
    Cancelled,
}

impl BillingPeriodStatus {
    /// Returns the lowercase name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriodStatus::Draft => "draft",
            BillingPeriodStatus::Processing => "processing",
            BillingPeriodStatus::Completed => "completed",
            BillingPeriodStatus::Exported => "exported",
            BillingPeriodStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true if charges of a period in this status may be amended.
    pub fn allows_charge_amendment(&self) -> bool {
        matches!(
            self,
            BillingPeriodStatus::Draft | BillingPeriodStatus::Processing
        )
    }
}

impl fmt::Display for BillingPeriodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One payroll cycle over which charges are accumulated.
///
/// `start_date` and `end_date` are both inclusive: the period
/// `[2024-01-01, 2024-01-31]` is 31 days long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    /// Unique identifier.
    pub id: Uuid,
    /// Operator-facing label, unique among non-cancelled periods.
    pub name: String,
    /// First day of the period.
    pub start_date: NaiveDate,
    /// Last day of the period.
    pub end_date: NaiveDate,
    /// Current lifecycle status.
    pub status: BillingPeriodStatus,
    /// Date the period was exported to payroll.
    #[serde(default)]
    pub payroll_export_date: Option<NaiveDate>,
    /// When the period was created.
    pub created_at: DateTime<Utc>,
    /// When the period was last modified.
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, bumped by the store on every write.
    #[serde(default)]
    pub version: u64,
}

impl BillingPeriod {
    /// Creates a new Draft period after validating its dates.
    ///
    /// # Example
    ///
    /// ```
    /// use billing_engine::models::{BillingPeriod, BillingPeriodStatus};
    /// use chrono::{NaiveDate, Utc};
    ///
    /// let period = BillingPeriod::new(
    ///     "2024-01",
    ///     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
    ///     NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
    ///     Utc::now(),
    /// )
    /// .unwrap();
    /// assert_eq!(period.status, BillingPeriodStatus::Draft);
    /// assert_eq!(period.duration_days(), 31);
    /// ```
    pub fn new(
        name: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> EngineResult<Self> {
        let period = Self {
            id: Uuid::new_v4(),
            name: name.into(),
            start_date,
            end_date,
            status: BillingPeriodStatus::Draft,
            payroll_export_date: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        period.validate()?;
        Ok(period)
    }

    /// Checks the date and naming invariants.
    pub fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::InvalidPeriod {
                message: "name must not be empty".to_string(),
            });
        }
        if self.start_date >= self.end_date {
            return Err(EngineError::InvalidPeriod {
                message: format!(
                    "start date {} must be before end date {}",
                    self.start_date, self.end_date
                ),
            });
        }
        match self.payroll_export_date {
            Some(export_date) if export_date < self.end_date => Err(EngineError::InvalidPeriod {
                message: format!(
                    "payroll export date {} precedes end date {}",
                    export_date, self.end_date
                ),
            }),
            _ => Ok(()),
        }
    }

    /// Returns the period as a half-open span for proration.
    pub fn span(&self) -> EngineResult<DateSpan> {
        DateSpan::from_inclusive(self.start_date, self.end_date)
    }

    /// Number of days in the period, counting both ends.
    pub fn duration_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }

    /// Checks if a date falls within the period, inclusive of both ends.
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }

    /// Returns true if the period still claims its name.
    pub fn claims_name(&self) -> bool {
        self.status != BillingPeriodStatus::Cancelled
    }
}
