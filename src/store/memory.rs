//! In-memory [`BillingStore`] used by the service binary and the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{BillingPeriod, Charge, PayrollExport};

use super::BillingStore;

#[derive(Debug, Default)]
struct Tables {
    periods: HashMap<Uuid, BillingPeriod>,
    charges: HashMap<Uuid, Charge>,
    exports: HashMap<Uuid, PayrollExport>,
}

/// A [`BillingStore`] backed by hash maps behind a single lock.
///
/// Writes to one table are atomic with respect to each other, which is all
/// the compare-and-swap contract needs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BillingStore for InMemoryStore {
    async fn get_period(&self, period_id: Uuid) -> EngineResult<Option<BillingPeriod>> {
        Ok(self.tables.read().await.periods.get(&period_id).cloned())
    }

    async fn list_periods(&self) -> EngineResult<Vec<BillingPeriod>> {
        let tables = self.tables.read().await;
        let mut periods: Vec<BillingPeriod> = tables.periods.values().cloned().collect();
        periods.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(periods)
    }

    async fn insert_period(&self, period: BillingPeriod) -> EngineResult<BillingPeriod> {
        let mut tables = self.tables.write().await;
        if tables.periods.contains_key(&period.id) {
            return Err(EngineError::InvalidPeriod {
                message: format!("billing period {} already exists", period.id),
            });
        }
        tables.periods.insert(period.id, period.clone());
        Ok(period)
    }

    async fn compare_and_swap_period(&self, period: BillingPeriod) -> EngineResult<BillingPeriod> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .periods
            .get(&period.id)
            .ok_or(EngineError::PeriodNotFound {
                period_id: period.id,
            })?;

        if stored.version != period.version {
            return Err(EngineError::ConcurrentModification {
                period_id: period.id,
                message: format!(
                    "expected version {}, found {} ({})",
                    period.version, stored.version, stored.status
                ),
            });
        }

        let mut next = period;
        next.version += 1;
        tables.periods.insert(next.id, next.clone());
        Ok(next)
    }

    async fn get_charge(&self, charge_id: Uuid) -> EngineResult<Option<Charge>> {
        Ok(self.tables.read().await.charges.get(&charge_id).cloned())
    }

    async fn put_charge(&self, charge: Charge) -> EngineResult<()> {
        self.tables.write().await.charges.insert(charge.id, charge);
        Ok(())
    }

    async fn charges_for_period(&self, period_id: Uuid) -> EngineResult<Vec<Charge>> {
        let tables = self.tables.read().await;
        let mut charges: Vec<Charge> = tables
            .charges
            .values()
            .filter(|c| c.billing_period_id == period_id)
            .cloned()
            .collect();
        charges.sort_by_key(|c| c.sequence);
        Ok(charges)
    }

    async fn get_export(&self, export_id: Uuid) -> EngineResult<Option<PayrollExport>> {
        Ok(self.tables.read().await.exports.get(&export_id).cloned())
    }

    async fn put_export(&self, export: PayrollExport) -> EngineResult<()> {
        self.tables.write().await.exports.insert(export.id, export);
        Ok(())
    }

    async fn exports_for_period(&self, period_id: Uuid) -> EngineResult<Vec<PayrollExport>> {
        let tables = self.tables.read().await;
        let mut exports: Vec<PayrollExport> = tables
            .exports
            .values()
            .filter(|e| e.billing_period_id == period_id)
            .cloned()
            .collect();
        exports.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(exports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BillingPeriodStatus;
    use chrono::{NaiveDate, Utc};

    fn january() -> BillingPeriod {
        BillingPeriod::new(
            "2024-01",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get_period() {
        let store = InMemoryStore::new();
        let period = store.insert_period(january()).await.unwrap();
        let fetched = store.get_period(period.id).await.unwrap().unwrap();
        assert_eq!(fetched, period);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected() {
        let store = InMemoryStore::new();
        let period = store.insert_period(january()).await.unwrap();
        let result = store.insert_period(period).await;
        assert!(matches!(result, Err(EngineError::InvalidPeriod { .. })));
    }

    #[tokio::test]
    async fn test_cas_bumps_version() {
        let store = InMemoryStore::new();
        let mut period = store.insert_period(january()).await.unwrap();
        period.status = BillingPeriodStatus::Processing;
        let stored = store.compare_and_swap_period(period).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.status, BillingPeriodStatus::Processing);
    }

    #[tokio::test]
    async fn test_cas_with_stale_version_loses() {
        let store = InMemoryStore::new();
        let period = store.insert_period(january()).await.unwrap();

        let mut first = period.clone();
        first.status = BillingPeriodStatus::Processing;
        store.compare_and_swap_period(first).await.unwrap();

        let mut second = period;
        second.status = BillingPeriodStatus::Cancelled;
        let result = store.compare_and_swap_period(second).await;
        assert!(matches!(
            result,
            Err(EngineError::ConcurrentModification { .. })
        ));
    }

    #[tokio::test]
    async fn test_cas_unknown_period() {
        let store = InMemoryStore::new();
        let result = store.compare_and_swap_period(january()).await;
        assert!(matches!(result, Err(EngineError::PeriodNotFound { .. })));
    }
}
