//! The charge ledger: the only writer of charges.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{Charge, ChargeFilter, ChargePatch, ChargeType, NewCharge};
use crate::store::{BillingStore, require_charge, require_period};

use super::runs::PeriodLocks;

/// Result of appending a charge.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// The charge was written.
    Appended(Charge),
    /// A charge for the same source and `source_id` already exists in the
    /// period; it is returned unchanged and nothing was written.
    AlreadyCharged(Charge),
}

impl AppendOutcome {
    /// The charge that now represents the activity.
    pub fn charge(&self) -> &Charge {
        match self {
            AppendOutcome::Appended(charge) | AppendOutcome::AlreadyCharged(charge) => charge,
        }
    }

    /// Returns true if a new charge was written.
    pub fn is_appended(&self) -> bool {
        matches!(self, AppendOutcome::Appended(_))
    }
}

/// Validates and persists charges.
///
/// Appends and amendments to one billing period are serialized through a
/// per-period lock, so the duplicate check and the sequence number are
/// computed against a stable view of the period's charges. A state machine
/// built over [`ChargeLedger::period_locks`] takes the same lock, so the
/// status seen by a write is still current when the write lands.
pub struct ChargeLedger {
    store: Arc<dyn BillingStore>,
    tolerance: Decimal,
    locks: Arc<PeriodLocks>,
}

impl ChargeLedger {
    /// Creates a ledger that checks totals with the given tolerance.
    pub fn new(store: Arc<dyn BillingStore>, tolerance: Decimal) -> Self {
        Self {
            store,
            tolerance,
            locks: Arc::new(PeriodLocks::new()),
        }
    }

    /// The per-period locks charge writes are made under.
    pub fn period_locks(&self) -> Arc<PeriodLocks> {
        Arc::clone(&self.locks)
    }

    /// Appends a charge to a Draft or Processing period.
    ///
    /// Idempotent per (`source_name`, `source_id`): a second append for an
    /// activity that is already charged returns
    /// [`AppendOutcome::AlreadyCharged`].
    ///
    /// # Errors
    ///
    /// - `PeriodNotFound` if the period does not exist
    /// - `InvalidPeriod` if the period no longer accepts charges
    /// - `InvalidCharge` if the charge violates an invariant
    pub async fn append(&self, period_id: Uuid, new_charge: NewCharge) -> EngineResult<AppendOutcome> {
        let _held = self.locks.lock(period_id).await;

        let period = require_period(self.store.as_ref(), period_id).await?;
        if !period.status.allows_charge_amendment() {
            return Err(EngineError::InvalidPeriod {
                message: format!(
                    "billing period {} is {}; charges can only be added while draft or processing",
                    period_id, period.status
                ),
            });
        }

        let existing = self.store.charges_for_period(period_id).await?;
        if let Some(charged) = existing.iter().find(|c| new_charge.same_activity(c)) {
            debug!(
                period_id = %period_id,
                source = charged.source_name.as_deref().unwrap_or_default(),
                source_id = charged.source_id.as_deref().unwrap_or_default(),
                charge_id = %charged.id,
                "Activity already charged"
            );
            return Ok(AppendOutcome::AlreadyCharged(charged.clone()));
        }

        let charge = new_charge.into_charge(period_id, existing.len() as u64, Utc::now());
        charge.validate(&period, self.tolerance)?;
        self.store.put_charge(charge.clone()).await?;

        debug!(
            period_id = %period_id,
            charge_id = %charge.id,
            staff_id = %charge.staff_id,
            charge_type = %charge.charge_type,
            amount = %charge.amount,
            "Charge appended"
        );
        Ok(AppendOutcome::Appended(charge))
    }

    /// Amends a charge while its period is Draft or Processing.
    ///
    /// The merged charge is re-validated and its total re-derived.
    ///
    /// # Errors
    ///
    /// - `ChargeNotFound` if the charge does not exist
    /// - `ChargeLocked` if the period is Completed, Exported or Cancelled
    /// - `InvalidCharge` if the merged charge violates an invariant
    pub async fn amend(&self, charge_id: Uuid, patch: &ChargePatch) -> EngineResult<Charge> {
        let charge = require_charge(self.store.as_ref(), charge_id).await?;

        let _held = self.locks.lock(charge.billing_period_id).await;

        let period = require_period(self.store.as_ref(), charge.billing_period_id).await?;
        if !period.status.allows_charge_amendment() {
            return Err(EngineError::ChargeLocked {
                charge_id,
                status: period.status,
            });
        }

        let current = require_charge(self.store.as_ref(), charge_id).await?;
        let amended = current.with_patch(patch, Utc::now());
        amended.validate(&period, self.tolerance)?;
        self.store.put_charge(amended.clone()).await?;

        info!(
            period_id = %period.id,
            charge_id = %charge_id,
            amount = %amended.amount,
            total_amount = %amended.total_amount,
            "Charge amended"
        );
        Ok(amended)
    }

    /// Sums charge amounts per type. Every type is present, zero if unused.
    pub async fn totals_by_type(&self, period_id: Uuid) -> EngineResult<BTreeMap<ChargeType, Decimal>> {
        let charges = self.all_for_period(period_id).await?;
        Ok(sum_by_type(&charges))
    }

    /// All charges of a period in creation order.
    pub async fn all_for_period(&self, period_id: Uuid) -> EngineResult<Vec<Charge>> {
        self.store.charges_for_period(period_id).await
    }

    /// Charges of a period matching a filter, in creation order.
    pub async fn list(&self, period_id: Uuid, filter: &ChargeFilter) -> EngineResult<Vec<Charge>> {
        let charges = self.all_for_period(period_id).await?;
        Ok(charges.into_iter().filter(|c| filter.matches(c)).collect())
    }
}

/// Sums amounts per charge type, with every type present.
pub(crate) fn sum_by_type(charges: &[Charge]) -> BTreeMap<ChargeType, Decimal> {
    let mut totals: BTreeMap<ChargeType, Decimal> =
        ChargeType::ALL.iter().map(|&t| (t, Decimal::ZERO)).collect();
    for charge in charges {
        *totals.entry(charge.charge_type).or_insert(Decimal::ZERO) += charge.amount;
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BillingPeriodStateMachine;
    use crate::calculation::TOTAL_TOLERANCE;
    use crate::models::BillingPeriod;
    use crate::models::BillingPeriodStatus;
    use crate::store::InMemoryStore;
    use crate::store::testing::DelayedStore;
    use chrono::NaiveDate;
    use std::str::FromStr;
    use std::time::Duration;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    struct Fixture {
        ledger: Arc<ChargeLedger>,
        machine: BillingPeriodStateMachine,
        period_id: Uuid,
    }

    async fn processing_period_in(store: Arc<dyn BillingStore>) -> Fixture {
        let period = BillingPeriod::new("2024-01", d(2024, 1, 1), d(2024, 1, 31), Utc::now()).unwrap();
        let period_id = period.id;
        store.insert_period(period).await.unwrap();
        let ledger = Arc::new(ChargeLedger::new(Arc::clone(&store), TOTAL_TOLERANCE));
        let machine = BillingPeriodStateMachine::with_locks(store, ledger.period_locks());
        machine.begin_processing(period_id).await.unwrap();
        Fixture {
            ledger,
            machine,
            period_id,
        }
    }

    async fn processing_period() -> Fixture {
        processing_period_in(Arc::new(InMemoryStore::new())).await
    }

    fn rent(source: &str, amount: &str) -> NewCharge {
        NewCharge::new("staff-1", ChargeType::Rent, dec(amount), "Rent - Unit 4B")
            .with_source_name("housing")
            .with_source(source)
    }

    #[tokio::test]
    async fn test_append_assigns_sequence_and_total() {
        let f = processing_period().await;
        let first = f.ledger.append(f.period_id, rent("a-1", "850.00")).await.unwrap();
        let second = f
            .ledger
            .append(
                f.period_id,
                rent("a-2", "100.00").with_adjustments(Some(dec("10.00")), Some(dec("5.00"))),
            )
            .await
            .unwrap();

        assert!(first.is_appended());
        assert_eq!(first.charge().sequence, 0);
        assert_eq!(second.charge().sequence, 1);
        assert_eq!(second.charge().total_amount, dec("105.00"));
    }

    #[tokio::test]
    async fn test_append_is_idempotent_per_source() {
        let f = processing_period().await;
        let first = f.ledger.append(f.period_id, rent("a-1", "850.00")).await.unwrap();
        let again = f.ledger.append(f.period_id, rent("a-1", "999.00")).await.unwrap();

        assert!(matches!(again, AppendOutcome::AlreadyCharged(_)));
        assert_eq!(again.charge().id, first.charge().id);
        assert_eq!(f.ledger.all_for_period(f.period_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_raw_id_from_two_sources_is_charged_twice() {
        let f = processing_period().await;
        f.ledger.append(f.period_id, rent("1", "850.00")).await.unwrap();
        let trip = NewCharge::new("staff-2", ChargeType::Transport, dec("30.00"), "Airport run")
            .with_source_name("transport")
            .with_source("1");

        let outcome = f.ledger.append(f.period_id, trip).await.unwrap();
        assert!(outcome.is_appended());
        assert_eq!(outcome.charge().staff_id, "staff-2");
        assert_eq!(f.ledger.all_for_period(f.period_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_appends_of_same_source_write_once() {
        let f = processing_period().await;
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&f.ledger);
                let period_id = f.period_id;
                tokio::spawn(async move { ledger.append(period_id, rent("a-1", "850.00")).await })
            })
            .collect();

        let mut appended = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_appended() {
                appended += 1;
            }
        }
        assert_eq!(appended, 1);
        assert_eq!(f.ledger.all_for_period(f.period_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_charge_is_not_written() {
        let f = processing_period().await;
        let result = f.ledger.append(f.period_id, rent("a-1", "0")).await;
        assert!(matches!(
            result,
            Err(EngineError::InvalidCharge { ref field, .. }) if field == "amount"
        ));

        let outside = rent("a-2", "10.00").with_proration(Decimal::ONE, d(2024, 1, 20), d(2024, 2, 1));
        assert!(f.ledger.append(f.period_id, outside).await.is_err());
        assert!(f.ledger.all_for_period(f.period_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_rejected_after_completion() {
        let f = processing_period().await;
        f.machine.complete_processing(f.period_id).await.unwrap();
        let result = f.ledger.append(f.period_id, rent("a-1", "850.00")).await;
        assert!(matches!(result, Err(EngineError::InvalidPeriod { .. })));
    }

    #[tokio::test]
    async fn test_amend_rederives_total() {
        let f = processing_period().await;
        let charge = f
            .ledger
            .append(f.period_id, rent("a-1", "850.00"))
            .await
            .unwrap()
            .charge()
            .clone();

        let patch = ChargePatch {
            amount: Some(dec("800.00")),
            tax_amount: Some(dec("80.00")),
            ..Default::default()
        };
        let amended = f.ledger.amend(charge.id, &patch).await.unwrap();
        assert_eq!(amended.total_amount, dec("880.00"));
        assert_eq!(amended.sequence, charge.sequence);
    }

    #[tokio::test]
    async fn test_amend_rejects_invalid_merge() {
        let f = processing_period().await;
        let charge = f
            .ledger
            .append(f.period_id, rent("a-1", "850.00"))
            .await
            .unwrap()
            .charge()
            .clone();

        let patch = ChargePatch {
            description: Some("x".repeat(501)),
            ..Default::default()
        };
        let result = f.ledger.amend(charge.id, &patch).await;
        assert!(matches!(result, Err(EngineError::InvalidCharge { .. })));
    }

    #[tokio::test]
    async fn test_amend_locked_after_completion() {
        let f = processing_period().await;
        let charge = f
            .ledger
            .append(f.period_id, rent("a-1", "850.00"))
            .await
            .unwrap()
            .charge()
            .clone();
        f.machine.complete_processing(f.period_id).await.unwrap();

        let result = f.ledger.amend(charge.id, &ChargePatch::default()).await;
        assert!(matches!(
            result,
            Err(EngineError::ChargeLocked { status: BillingPeriodStatus::Completed, .. })
        ));
    }

    #[tokio::test]
    async fn test_amend_in_flight_finishes_before_completion() {
        let store: Arc<dyn BillingStore> =
            Arc::new(DelayedStore::slow_charge_reads(Duration::from_millis(50)));
        let f = processing_period_in(Arc::clone(&store)).await;
        let charge = f
            .ledger
            .append(f.period_id, rent("a-1", "850.00"))
            .await
            .unwrap()
            .charge()
            .clone();

        let ledger = Arc::clone(&f.ledger);
        let amend = tokio::spawn(async move {
            let patch = ChargePatch {
                amount: Some(dec("1.00")),
                ..Default::default()
            };
            ledger.amend(charge.id, &patch).await
        });

        // The amend has checked the period and is re-reading the charge.
        tokio::time::sleep(Duration::from_millis(75)).await;
        let completed = f.machine.complete_processing(f.period_id).await.unwrap();
        let amended = amend.await.unwrap().unwrap();

        assert_eq!(completed.status, BillingPeriodStatus::Completed);
        assert!(amended.updated_at <= completed.updated_at);
        let stored = store.get_charge(amended.id).await.unwrap().unwrap();
        assert_eq!(stored.amount, dec("1.00"));

        let late = f.ledger.amend(amended.id, &ChargePatch::default()).await;
        assert!(matches!(late, Err(EngineError::ChargeLocked { .. })));
    }

    #[tokio::test]
    async fn test_totals_and_filters() {
        let f = processing_period().await;
        f.ledger.append(f.period_id, rent("a-1", "850.00")).await.unwrap();
        f.ledger
            .append(
                f.period_id,
                NewCharge::new("staff-2", ChargeType::Transport, dec("20.00"), "Airport run")
                    .with_source("t-1"),
            )
            .await
            .unwrap();

        let totals = f.ledger.totals_by_type(f.period_id).await.unwrap();
        assert_eq!(totals[&ChargeType::Rent], dec("850.00"));
        assert_eq!(totals[&ChargeType::Transport], dec("20.00"));
        assert_eq!(totals[&ChargeType::Utilities], Decimal::ZERO);

        let filter = ChargeFilter {
            staff_id: Some("staff-2".to_string()),
            ..Default::default()
        };
        let listed = f.ledger.list(f.period_id, &filter).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].source_id.as_deref(), Some("t-1"));
    }
}
