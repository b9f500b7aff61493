//! Store wrappers for exercising interleavings in tests.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::models::{BillingPeriod, Charge, PayrollExport};

use super::{BillingStore, InMemoryStore};

/// An [`InMemoryStore`] that sleeps before selected calls.
#[derive(Debug, Default)]
pub(crate) struct DelayedStore {
    inner: InMemoryStore,
    charge_read_delay: Option<Duration>,
    period_swap_delay: Option<Duration>,
}

impl DelayedStore {
    /// Delays every `get_charge`.
    pub(crate) fn slow_charge_reads(delay: Duration) -> Self {
        Self {
            charge_read_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Delays every `compare_and_swap_period`.
    pub(crate) fn slow_period_swaps(delay: Duration) -> Self {
        Self {
            period_swap_delay: Some(delay),
            ..Self::default()
        }
    }
}

async fn pause(delay: Option<Duration>) {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl BillingStore for DelayedStore {
    async fn get_period(&self, period_id: Uuid) -> EngineResult<Option<BillingPeriod>> {
        self.inner.get_period(period_id).await
    }

    async fn list_periods(&self) -> EngineResult<Vec<BillingPeriod>> {
        self.inner.list_periods().await
    }

    async fn insert_period(&self, period: BillingPeriod) -> EngineResult<BillingPeriod> {
        self.inner.insert_period(period).await
    }

    async fn compare_and_swap_period(&self, period: BillingPeriod) -> EngineResult<BillingPeriod> {
        pause(self.period_swap_delay).await;
        self.inner.compare_and_swap_period(period).await
    }

    async fn get_charge(&self, charge_id: Uuid) -> EngineResult<Option<Charge>> {
        pause(self.charge_read_delay).await;
        self.inner.get_charge(charge_id).await
    }

    async fn put_charge(&self, charge: Charge) -> EngineResult<()> {
        self.inner.put_charge(charge).await
    }

    async fn charges_for_period(&self, period_id: Uuid) -> EngineResult<Vec<Charge>> {
        self.inner.charges_for_period(period_id).await
    }

    async fn get_export(&self, export_id: Uuid) -> EngineResult<Option<PayrollExport>> {
        self.inner.get_export(export_id).await
    }

    async fn put_export(&self, export: PayrollExport) -> EngineResult<()> {
        self.inner.put_export(export).await
    }

    async fn exports_for_period(&self, period_id: Uuid) -> EngineResult<Vec<PayrollExport>> {
        self.inner.exports_for_period(period_id).await
    }
}
