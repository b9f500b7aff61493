//! Core data models for the Billing Engine.
//!
//! This module contains all the domain records the engine reads and writes.

mod activity;
mod billing_period;
mod charge;
mod payroll_export;
mod progress;
mod transaction;

pub use activity::Activity;
pub use billing_period::{BillingPeriod, BillingPeriodStatus};
pub use charge::{Charge, ChargeFilter, ChargePatch, ChargeType, MAX_DESCRIPTION_LEN, NewCharge};
pub use payroll_export::{ExportFormat, ExportStatus, PayrollExport, StaffSummary};
pub use progress::{
    ProcessingProgress, ProcessingReport, RunState, SourceFailureReport,
};
pub use transaction::Transaction;
