//! Billing period lifecycle.
//!
//! Every status change goes through [`is_legal_transition`] and is then
//! written with a compare-and-swap against the version that was read, so a
//! second writer racing on the same period gets `ConcurrentModification`.
//! The read and the swap happen under the period's [`PeriodLocks`] entry,
//! which the charge ledger also holds while it writes.
//!
//! ```text
//!            begin_processing          complete_processing          mark_exported
//!   Draft ───────────────────► Processing ──────────────────► Completed ──────────► Exported
//!     ▲ │                           │
//!     │ │ cancel                    │ cancel
//!     │ ▼                           ▼
//!     └──────── Cancelled ◄─────────┘
//!     reactivate
//! ```

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{BillingPeriod, BillingPeriodStatus, ExportStatus};
use crate::store::{BillingStore, require_period};

use super::runs::PeriodLocks;

/// Returns true if `from -> to` is one of the six legal transitions.
///
/// # Example
///
/// ```
/// use billing_engine::engine::is_legal_transition;
/// use billing_engine::models::BillingPeriodStatus::*;
///
/// assert!(is_legal_transition(Draft, Processing));
/// assert!(is_legal_transition(Cancelled, Draft));
/// assert!(!is_legal_transition(Completed, Processing));
/// assert!(!is_legal_transition(Exported, Cancelled));
/// ```
pub fn is_legal_transition(from: BillingPeriodStatus, to: BillingPeriodStatus) -> bool {
    use BillingPeriodStatus::*;

    matches!(
        (from, to),
        (Draft, Processing)
            | (Processing, Completed)
            | (Completed, Exported)
            | (Draft, Cancelled)
            | (Processing, Cancelled)
            | (Cancelled, Draft)
    )
}

/// Applies lifecycle transitions to persisted billing periods.
#[derive(Clone)]
pub struct BillingPeriodStateMachine {
    store: Arc<dyn BillingStore>,
    locks: Arc<PeriodLocks>,
}

impl BillingPeriodStateMachine {
    /// Creates a state machine over a store with its own period locks.
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self::with_locks(store, Arc::new(PeriodLocks::new()))
    }

    /// Creates a state machine sharing period locks with a charge ledger.
    pub fn with_locks(store: Arc<dyn BillingStore>, locks: Arc<PeriodLocks>) -> Self {
        Self { store, locks }
    }

    /// Draft -> Processing.
    pub async fn begin_processing(&self, period_id: Uuid) -> EngineResult<BillingPeriod> {
        let _held = self.locks.lock(period_id).await;
        let period = require_period(self.store.as_ref(), period_id).await?;
        self.transition(period, BillingPeriodStatus::Processing)
            .await
    }

    /// Processing -> Completed.
    pub async fn complete_processing(&self, period_id: Uuid) -> EngineResult<BillingPeriod> {
        let _held = self.locks.lock(period_id).await;
        let period = require_period(self.store.as_ref(), period_id).await?;
        self.transition(period, BillingPeriodStatus::Completed)
            .await
    }

    /// Completed -> Exported, recording the payroll export date.
    ///
    /// Fails with `InvalidPeriod` if the period has no Completed export or the
    /// export date precedes the period's end date.
    pub async fn mark_exported(
        &self,
        period_id: Uuid,
        export_date: NaiveDate,
    ) -> EngineResult<BillingPeriod> {
        let _held = self.locks.lock(period_id).await;
        let mut period = require_period(self.store.as_ref(), period_id).await?;
        self.check(&period, BillingPeriodStatus::Exported)?;

        let exports = self.store.exports_for_period(period_id).await?;
        if !exports.iter().any(|e| e.status == ExportStatus::Completed) {
            return Err(EngineError::InvalidPeriod {
                message: format!(
                    "billing period {} has no completed payroll export",
                    period_id
                ),
            });
        }

        period.payroll_export_date = Some(export_date);
        period.validate()?;
        self.transition(period, BillingPeriodStatus::Exported).await
    }

    /// Draft or Processing -> Cancelled. Charges are kept.
    pub async fn cancel(&self, period_id: Uuid) -> EngineResult<BillingPeriod> {
        let _held = self.locks.lock(period_id).await;
        let period = require_period(self.store.as_ref(), period_id).await?;
        self.transition(period, BillingPeriodStatus::Cancelled)
            .await
    }

    /// Cancelled -> Draft. Charges are kept.
    ///
    /// Fails with `InvalidPeriod` if another non-cancelled period has taken
    /// the name in the meantime.
    pub async fn reactivate(&self, period_id: Uuid) -> EngineResult<BillingPeriod> {
        let _held = self.locks.lock(period_id).await;
        let period = require_period(self.store.as_ref(), period_id).await?;
        self.check(&period, BillingPeriodStatus::Draft)?;

        let periods = self.store.list_periods().await?;
        if periods
            .iter()
            .any(|other| other.id != period.id && other.claims_name() && other.name == period.name)
        {
            return Err(EngineError::InvalidPeriod {
                message: format!(
                    "name '{}' is already used by another billing period",
                    period.name
                ),
            });
        }

        self.transition(period, BillingPeriodStatus::Draft).await
    }

    /// Changes the date range of a Draft period.
    pub async fn reschedule(
        &self,
        period_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> EngineResult<BillingPeriod> {
        let _held = self.locks.lock(period_id).await;
        let mut period = require_period(self.store.as_ref(), period_id).await?;
        if period.status != BillingPeriodStatus::Draft {
            return Err(EngineError::InvalidPeriod {
                message: format!(
                    "billing period {} is {}; dates can only change while draft",
                    period_id, period.status
                ),
            });
        }

        period.start_date = start_date;
        period.end_date = end_date;
        period.updated_at = Utc::now();
        period.validate()?;

        let stored = self.store.compare_and_swap_period(period).await?;
        info!(
            period_id = %stored.id,
            start_date = %stored.start_date,
            end_date = %stored.end_date,
            "Billing period rescheduled"
        );
        Ok(stored)
    }

    fn check(&self, period: &BillingPeriod, to: BillingPeriodStatus) -> EngineResult<()> {
        if !is_legal_transition(period.status, to) {
            return Err(EngineError::InvalidTransition {
                period_id: period.id,
                from: period.status,
                to,
            });
        }
        Ok(())
    }

    async fn transition(
        &self,
        mut period: BillingPeriod,
        to: BillingPeriodStatus,
    ) -> EngineResult<BillingPeriod> {
        self.check(&period, to)?;

        let from = period.status;
        period.status = to;
        period.updated_at = Utc::now();

        let stored = self.store.compare_and_swap_period(period).await?;
        info!(
            period_id = %stored.id,
            from = %from,
            to = %to,
            version = stored.version,
            "Billing period transitioned"
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExportFormat, PayrollExport};
    use crate::store::InMemoryStore;
    use BillingPeriodStatus::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    async fn setup(name: &str) -> (Arc<InMemoryStore>, BillingPeriodStateMachine, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        let machine = BillingPeriodStateMachine::new(store.clone());
        let period = BillingPeriod::new(name, d(2024, 1, 1), d(2024, 1, 31), Utc::now()).unwrap();
        let id = period.id;
        store.insert_period(period).await.unwrap();
        (store, machine, id)
    }

    async fn add_completed_export(store: &InMemoryStore, period_id: Uuid) {
        let export = PayrollExport::pending(
            period_id,
            d(2024, 2, 5),
            "payroll.csv",
            ExportFormat::Csv,
            Utc::now(),
        )
        .complete(10, Utc::now())
        .unwrap();
        store.put_export(export).await.unwrap();
    }

    fn assert_invalid_transition(
        result: EngineResult<BillingPeriod>,
        from: BillingPeriodStatus,
        to: BillingPeriodStatus,
    ) {
        match result {
            Err(EngineError::InvalidTransition {
                from: actual_from,
                to: actual_to,
                ..
            }) => {
                assert_eq!(actual_from, from);
                assert_eq!(actual_to, to);
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn test_transition_table_is_exactly_six_edges() {
        let all = [Draft, Processing, Completed, Exported, Cancelled];
        let legal: Vec<_> = all
            .iter()
            .flat_map(|&from| all.iter().map(move |&to| (from, to)))
            .filter(|&(from, to)| is_legal_transition(from, to))
            .collect();
        assert_eq!(legal.len(), 6);
        for to in all {
            assert!(!is_legal_transition(Exported, to));
        }
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (store, machine, id) = setup("2024-01").await;

        let period = machine.begin_processing(id).await.unwrap();
        assert_eq!(period.status, Processing);
        assert_eq!(period.version, 1);

        let period = machine.complete_processing(id).await.unwrap();
        assert_eq!(period.status, Completed);

        add_completed_export(&store, id).await;
        let period = machine.mark_exported(id, d(2024, 2, 5)).await.unwrap();
        assert_eq!(period.status, Exported);
        assert_eq!(period.payroll_export_date, Some(d(2024, 2, 5)));
    }

    #[tokio::test]
    async fn test_completed_cannot_return_to_processing() {
        let (_store, machine, id) = setup("2024-01").await;
        machine.begin_processing(id).await.unwrap();
        machine.complete_processing(id).await.unwrap();

        assert_invalid_transition(machine.begin_processing(id).await, Completed, Processing);
    }

    #[tokio::test]
    async fn test_exported_is_terminal() {
        let (store, machine, id) = setup("2024-01").await;
        machine.begin_processing(id).await.unwrap();
        machine.complete_processing(id).await.unwrap();
        add_completed_export(&store, id).await;
        machine.mark_exported(id, d(2024, 2, 5)).await.unwrap();

        assert_invalid_transition(machine.cancel(id).await, Exported, Cancelled);
        assert_invalid_transition(machine.begin_processing(id).await, Exported, Processing);
        assert_invalid_transition(machine.reactivate(id).await, Exported, Draft);
        assert_invalid_transition(
            machine.mark_exported(id, d(2024, 2, 6)).await,
            Exported,
            Exported,
        );
    }

    #[tokio::test]
    async fn test_cancelled_cannot_complete() {
        let (_store, machine, id) = setup("2024-01").await;
        machine.cancel(id).await.unwrap();
        assert_invalid_transition(machine.complete_processing(id).await, Cancelled, Completed);
    }

    #[tokio::test]
    async fn test_completed_cannot_be_cancelled() {
        let (_store, machine, id) = setup("2024-01").await;
        machine.begin_processing(id).await.unwrap();
        machine.complete_processing(id).await.unwrap();
        assert_invalid_transition(machine.cancel(id).await, Completed, Cancelled);
    }

    #[tokio::test]
    async fn test_mark_exported_requires_completed_export() {
        let (_store, machine, id) = setup("2024-01").await;
        machine.begin_processing(id).await.unwrap();
        machine.complete_processing(id).await.unwrap();

        let result = machine.mark_exported(id, d(2024, 2, 5)).await;
        assert!(matches!(result, Err(EngineError::InvalidPeriod { .. })));
    }

    #[tokio::test]
    async fn test_cancel_then_reactivate() {
        let (_store, machine, id) = setup("2024-01").await;
        machine.begin_processing(id).await.unwrap();
        assert_eq!(machine.cancel(id).await.unwrap().status, Cancelled);
        assert_eq!(machine.reactivate(id).await.unwrap().status, Draft);
    }

    #[tokio::test]
    async fn test_reactivate_rejects_taken_name() {
        let (store, machine, id) = setup("2024-01").await;
        machine.cancel(id).await.unwrap();

        let replacement =
            BillingPeriod::new("2024-01", d(2024, 1, 1), d(2024, 1, 31), Utc::now()).unwrap();
        store.insert_period(replacement).await.unwrap();

        let result = machine.reactivate(id).await;
        assert!(matches!(result, Err(EngineError::InvalidPeriod { .. })));
    }

    #[tokio::test]
    async fn test_stale_version_loses() {
        let (store, machine, id) = setup("2024-01").await;
        let stale = store.get_period(id).await.unwrap().unwrap();

        machine.begin_processing(id).await.unwrap();

        let result = machine.transition(stale, Cancelled).await;
        assert!(matches!(
            result,
            Err(EngineError::ConcurrentModification { .. })
        ));
        let stored = store.get_period(id).await.unwrap().unwrap();
        assert_eq!(stored.status, Processing);
    }

    #[tokio::test]
    async fn test_reschedule_only_while_draft() {
        let (_store, machine, id) = setup("2024-01").await;
        let period = machine
            .reschedule(id, d(2024, 1, 2), d(2024, 2, 1))
            .await
            .unwrap();
        assert_eq!(period.start_date, d(2024, 1, 2));

        let inverted = machine.reschedule(id, d(2024, 2, 1), d(2024, 1, 1)).await;
        assert!(matches!(inverted, Err(EngineError::InvalidPeriod { .. })));

        machine.begin_processing(id).await.unwrap();
        let result = machine.reschedule(id, d(2024, 1, 1), d(2024, 1, 31)).await;
        assert!(matches!(result, Err(EngineError::InvalidPeriod { .. })));
    }

    #[tokio::test]
    async fn test_unknown_period() {
        let (_store, machine, _id) = setup("2024-01").await;
        let missing = Uuid::new_v4();
        let result = machine.begin_processing(missing).await;
        assert!(matches!(
            result,
            Err(EngineError::PeriodNotFound { period_id }) if period_id == missing
        ));
    }
}
