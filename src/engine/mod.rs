//! Billing period processing.
//!
//! This module ties the calculation rules and the store together:
//!
//! - [`BillingPeriodStateMachine`] owns every status change
//! - [`ChargeLedger`] is the only writer of charges
//! - [`ChargeOrchestrator`] turns source activity into charges
//! - [`PayrollExportBuilder`] serializes Completed periods for payroll
//! - [`BillingEngine`] wires them up behind one facade
//!
//! At most one processing run and one export run may be active per billing
//! period. Losers of either race get `ConcurrentModification` and change
//! nothing.

mod export;
mod ledger;
mod orchestrator;
mod render;
mod runs;
mod service;
mod state_machine;

pub use export::PayrollExportBuilder;
pub use ledger::{AppendOutcome, ChargeLedger};
pub use orchestrator::{ChargeOrchestrator, ClaimedRun, charge_for_activity};
pub use render::{ExportDocument, export_file_name, render, summarize_by_staff};
pub use runs::{PeriodLocks, ProgressRegistry, RunGuard, RunKind, RunRegistry};
pub use service::{BillingEngine, BillingEngineBuilder, PeriodTotals};
pub use state_machine::{BillingPeriodStateMachine, is_legal_transition};
