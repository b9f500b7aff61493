//! Durable store abstraction.
//!
//! The engine never talks to a database directly. It reads and writes
//! billing periods, charges and payroll exports through [`BillingStore`],
//! whose `compare_and_swap_period` is what keeps two operators from moving
//! the same period at once.

mod memory;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{BillingPeriod, Charge, PayrollExport};

pub use memory::InMemoryStore;

/// Repository-style access to engine records.
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Fetches a billing period.
    async fn get_period(&self, period_id: Uuid) -> EngineResult<Option<BillingPeriod>>;

    /// Lists every billing period, oldest first.
    async fn list_periods(&self) -> EngineResult<Vec<BillingPeriod>>;

    /// Inserts a new billing period and returns the stored copy.
    ///
    /// Fails with `InvalidPeriod` if the id is already taken.
    async fn insert_period(&self, period: BillingPeriod) -> EngineResult<BillingPeriod>;

    /// Replaces a billing period if the stored version still equals
    /// `period.version`, and returns the stored copy with its version bumped.
    ///
    /// Fails with `ConcurrentModification` if another writer got there first.
    async fn compare_and_swap_period(&self, period: BillingPeriod) -> EngineResult<BillingPeriod>;

    /// Fetches a charge.
    async fn get_charge(&self, charge_id: Uuid) -> EngineResult<Option<Charge>>;

    /// Inserts or replaces a charge.
    async fn put_charge(&self, charge: Charge) -> EngineResult<()>;

    /// Returns all charges of a period ordered by `sequence`.
    async fn charges_for_period(&self, period_id: Uuid) -> EngineResult<Vec<Charge>>;

    /// Fetches a payroll export.
    async fn get_export(&self, export_id: Uuid) -> EngineResult<Option<PayrollExport>>;

    /// Inserts or replaces a payroll export.
    async fn put_export(&self, export: PayrollExport) -> EngineResult<()>;

    /// Returns all exports of a period, oldest first.
    async fn exports_for_period(&self, period_id: Uuid) -> EngineResult<Vec<PayrollExport>>;
}

/// Fetches a billing period or fails with `PeriodNotFound`.
pub async fn require_period(
    store: &dyn BillingStore,
    period_id: Uuid,
) -> EngineResult<BillingPeriod> {
    store
        .get_period(period_id)
        .await?
        .ok_or(EngineError::PeriodNotFound { period_id })
}

/// Fetches a charge or fails with `ChargeNotFound`.
pub async fn require_charge(store: &dyn BillingStore, charge_id: Uuid) -> EngineResult<Charge> {
    store
        .get_charge(charge_id)
        .await?
        .ok_or(EngineError::ChargeNotFound { charge_id })
}

/// Fetches a payroll export or fails with `ExportNotFound`.
pub async fn require_export(
    store: &dyn BillingStore,
    export_id: Uuid,
) -> EngineResult<PayrollExport> {
    store
        .get_export(export_id)
        .await?
        .ok_or(EngineError::ExportNotFound { export_id })
}
