//! Processing progress and run reports.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BillingPeriodStatus, ChargeType};

/// State of a charge generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Sources are still being consumed.
    Running,
    /// Every source was consumed and the period completed.
    Completed,
    /// A source failed; the period stays Processing.
    Failed,
}

/// The source that halted a run, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailureReport {
    /// Name of the failing source.
    pub source_name: String,
    /// What went wrong.
    pub cause: String,
}

/// Observable progress of the latest run for a billing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingProgress {
    /// The billing period being processed.
    pub period_id: Uuid,
    /// Current run state.
    pub state: RunState,
    /// Number of configured sources.
    pub sources_total: usize,
    /// Number of sources fully consumed.
    pub sources_processed: usize,
    /// The source currently being consumed.
    pub current_source: Option<String>,
    /// Charges appended by this run.
    pub charges_appended: u64,
    /// Activity skipped because it was already charged.
    pub duplicates_skipped: u64,
    /// Activity skipped because it did not overlap the period or rounded to zero.
    pub not_chargeable_skipped: u64,
    /// Set when the run failed.
    pub failure: Option<SourceFailureReport>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProcessingProgress {
    /// Creates progress for a run that is about to start.
    pub fn started(period_id: Uuid, sources_total: usize, now: DateTime<Utc>) -> Self {
        Self {
            period_id,
            state: RunState::Running,
            sources_total,
            sources_processed: 0,
            current_source: None,
            charges_appended: 0,
            duplicates_skipped: 0,
            not_chargeable_skipped: 0,
            failure: None,
            started_at: now,
            finished_at: None,
        }
    }

    /// Fraction of sources consumed, in `[0, 1]`.
    pub fn fraction_complete(&self) -> Decimal {
        if self.sources_total == 0 {
            return Decimal::ONE;
        }
        Decimal::from(self.sources_processed as u64) / Decimal::from(self.sources_total as u64)
    }
}

/// Summary returned by a finished charge generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingReport {
    /// The processed billing period.
    pub period_id: Uuid,
    /// Status of the period after the run.
    pub status: BillingPeriodStatus,
    /// Charges appended by this run.
    pub charges_appended: u64,
    /// Activity skipped because it was already charged.
    pub duplicates_skipped: u64,
    /// Activity skipped because it did not overlap the period or rounded to zero.
    pub not_chargeable_skipped: u64,
    /// Totals per charge type across the whole period.
    pub totals: BTreeMap<ChargeType, Decimal>,
    /// Run duration in microseconds.
    pub duration_us: u64,
}
