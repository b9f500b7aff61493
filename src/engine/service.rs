//! The engine facade used by the HTTP layer and the binary.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ConfigLoader;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    BillingPeriod, Charge, ChargeFilter, ChargePatch, ChargeType, ExportFormat, PayrollExport,
    ProcessingProgress, ProcessingReport,
};
use crate::sources::{ActivitySource, ExportSink, MemoryExportSink};
use crate::store::{BillingStore, InMemoryStore, require_export, require_period};

use super::runs::{ProgressRegistry, RunKind, RunRegistry};
use super::{BillingPeriodStateMachine, ChargeLedger, ChargeOrchestrator, PayrollExportBuilder};

/// Charge totals of one billing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodTotals {
    /// The billing period.
    pub period_id: Uuid,
    /// Summed amounts per charge type.
    pub by_type: BTreeMap<ChargeType, Decimal>,
    /// Sum of all amounts.
    pub total_amount: Decimal,
    /// Number of charges.
    pub charge_count: u64,
}

/// Billing period administration, charge generation and payroll export.
///
/// # Example
///
/// ```no_run
/// use billing_engine::config::ConfigLoader;
/// use billing_engine::engine::BillingEngine;
/// use chrono::NaiveDate;
///
/// # async fn run() -> billing_engine::error::EngineResult<()> {
/// let engine = BillingEngine::builder(ConfigLoader::default()).build();
/// let period = engine
///     .create_period(
///         "2024-01",
///         NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
///         NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
///     )
///     .await?;
/// let report = engine.process_period(period.id).await?;
/// println!("appended {} charges", report.charges_appended);
/// # Ok(())
/// # }
/// ```
pub struct BillingEngine {
    store: Arc<dyn BillingStore>,
    state_machine: BillingPeriodStateMachine,
    ledger: Arc<ChargeLedger>,
    orchestrator: Arc<ChargeOrchestrator>,
    exporter: PayrollExportBuilder,
    runs: Arc<RunRegistry>,
    progress: Arc<ProgressRegistry>,
    default_format: ExportFormat,
    admin: AsyncMutex<()>,
}

/// Assembles a [`BillingEngine`] from configuration and collaborators.
pub struct BillingEngineBuilder {
    config: ConfigLoader,
    store: Option<Arc<dyn BillingStore>>,
    sink: Option<Arc<dyn ExportSink>>,
    sources: Vec<Arc<dyn ActivitySource>>,
}

impl BillingEngineBuilder {
    /// Uses `store` instead of a fresh in-memory store.
    pub fn store(mut self, store: Arc<dyn BillingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses `sink` instead of an in-memory sink.
    pub fn sink(mut self, sink: Arc<dyn ExportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Registers an activity source.
    pub fn source(mut self, source: Arc<dyn ActivitySource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Builds the engine.
    ///
    /// Sources named in `processing.source_order` run first, in that order;
    /// the rest follow in registration order.
    pub fn build(self) -> BillingEngine {
        let store: Arc<dyn BillingStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryStore::new()),
        };
        let sink: Arc<dyn ExportSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(MemoryExportSink::new()),
        };

        let order = self.config.source_order();
        let mut sources = self.sources;
        sources.sort_by_key(|source| {
            order
                .iter()
                .position(|name| name == source.name())
                .unwrap_or(order.len())
        });

        let runs = Arc::new(RunRegistry::new());
        let progress = Arc::new(ProgressRegistry::new());
        let ledger = Arc::new(ChargeLedger::new(
            Arc::clone(&store),
            self.config.money().total_tolerance,
        ));
        let orchestrator = Arc::new(ChargeOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            sources,
            Arc::clone(&runs),
            Arc::clone(&progress),
            self.config.source_timeout(),
            self.config.money().currency_decimals,
        ));
        let exporter = PayrollExportBuilder::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            sink,
            Arc::clone(&runs),
            self.config.sink_timeout(),
            self.config.export_file_prefix(),
        );

        BillingEngine {
            state_machine: BillingPeriodStateMachine::with_locks(Arc::clone(&store), ledger.period_locks()),
            store,
            ledger,
            orchestrator,
            exporter,
            runs,
            progress,
            default_format: self.config.default_export_format(),
            admin: AsyncMutex::new(()),
        }
    }
}

impl BillingEngine {
    /// Starts building an engine.
    pub fn builder(config: ConfigLoader) -> BillingEngineBuilder {
        BillingEngineBuilder {
            config,
            store: None,
            sink: None,
            sources: Vec::new(),
        }
    }

    /// Names of the activity sources, in consumption order.
    pub fn source_names(&self) -> Vec<String> {
        self.orchestrator.source_names()
    }

    /// Creates a Draft billing period.
    ///
    /// # Errors
    ///
    /// `InvalidPeriod` if the dates are inverted, the name is empty, or a
    /// non-cancelled period already uses the name.
    pub async fn create_period(
        &self,
        name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> EngineResult<BillingPeriod> {
        let _admin = self.admin.lock().await;

        let name = name.trim();
        let period = BillingPeriod::new(name, start_date, end_date, Utc::now())?;
        let periods = self.store.list_periods().await?;
        if periods.iter().any(|p| p.claims_name() && p.name == name) {
            return Err(EngineError::InvalidPeriod {
                message: format!("name '{}' is already used by another billing period", name),
            });
        }

        let stored = self.store.insert_period(period).await?;
        info!(
            period_id = %stored.id,
            name = %stored.name,
            start_date = %stored.start_date,
            end_date = %stored.end_date,
            "Billing period created"
        );
        Ok(stored)
    }

    /// Changes the dates of a Draft period.
    pub async fn reschedule_period(
        &self,
        period_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> EngineResult<BillingPeriod> {
        self.state_machine
            .reschedule(period_id, start_date, end_date)
            .await
    }

    /// Fetches a billing period.
    pub async fn get_period(&self, period_id: Uuid) -> EngineResult<BillingPeriod> {
        require_period(self.store.as_ref(), period_id).await
    }

    /// Lists every billing period, oldest first.
    pub async fn list_periods(&self) -> EngineResult<Vec<BillingPeriod>> {
        self.store.list_periods().await
    }

    /// Claims a processing run and executes it in the background.
    ///
    /// Returns the initial progress once the run is accepted. Rejections
    /// (`InvalidTransition`, `ConcurrentModification`) are returned before
    /// anything runs.
    pub async fn start_processing(&self, period_id: Uuid) -> EngineResult<ProcessingProgress> {
        let run = self.orchestrator.claim(period_id).await?;
        let initial = self
            .progress
            .get(period_id)
            .unwrap_or_else(|| ProcessingProgress::started(period_id, 0, Utc::now()));

        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            if let Err(err) = orchestrator.execute(run).await {
                warn!(period_id = %period_id, error = %err, "Background processing run failed");
            }
        });

        Ok(initial)
    }

    /// Claims and executes a processing run, waiting for it to finish.
    pub async fn process_period(&self, period_id: Uuid) -> EngineResult<ProcessingReport> {
        self.orchestrator.process(period_id).await
    }

    /// Latest processing progress, if the period has ever been processed
    /// by this engine.
    pub async fn progress(&self, period_id: Uuid) -> EngineResult<Option<ProcessingProgress>> {
        require_period(self.store.as_ref(), period_id).await?;
        Ok(self.progress.get(period_id))
    }

    /// Exports a Completed period dated today.
    ///
    /// `format` defaults to the configured export format.
    pub async fn export_to_payroll(
        &self,
        period_id: Uuid,
        format: Option<ExportFormat>,
    ) -> EngineResult<PayrollExport> {
        self.export_to_payroll_on(period_id, format, Utc::now().date_naive())
            .await
    }

    /// Exports a Completed period with an explicit payroll export date.
    pub async fn export_to_payroll_on(
        &self,
        period_id: Uuid,
        format: Option<ExportFormat>,
        export_date: NaiveDate,
    ) -> EngineResult<PayrollExport> {
        let format = format.unwrap_or(self.default_format);
        self.exporter.export(period_id, format, export_date).await
    }

    /// Export history of a period, oldest first.
    pub async fn list_exports(&self, period_id: Uuid) -> EngineResult<Vec<PayrollExport>> {
        require_period(self.store.as_ref(), period_id).await?;
        self.store.exports_for_period(period_id).await
    }

    /// Fetches one payroll export.
    pub async fn get_export(&self, export_id: Uuid) -> EngineResult<PayrollExport> {
        require_export(self.store.as_ref(), export_id).await
    }

    /// Cancels a Draft or Processing period. Charges are kept.
    ///
    /// A period with a processing run in flight cannot be cancelled; the run
    /// has to finish or fail first.
    pub async fn cancel_period(&self, period_id: Uuid) -> EngineResult<BillingPeriod> {
        let _claim = self.runs.try_claim(period_id, RunKind::Processing)?;
        self.state_machine.cancel(period_id).await
    }

    /// Returns a Cancelled period to Draft.
    pub async fn reactivate_period(&self, period_id: Uuid) -> EngineResult<BillingPeriod> {
        let _admin = self.admin.lock().await;
        self.state_machine.reactivate(period_id).await
    }

    /// Charges of a period matching `filter`, in creation order.
    pub async fn list_charges(
        &self,
        period_id: Uuid,
        filter: &ChargeFilter,
    ) -> EngineResult<Vec<Charge>> {
        require_period(self.store.as_ref(), period_id).await?;
        self.ledger.list(period_id, filter).await
    }

    /// Charge totals of a period.
    pub async fn get_totals(&self, period_id: Uuid) -> EngineResult<PeriodTotals> {
        require_period(self.store.as_ref(), period_id).await?;
        let charges = self.ledger.all_for_period(period_id).await?;
        let by_type = self.ledger.totals_by_type(period_id).await?;
        Ok(PeriodTotals {
            period_id,
            total_amount: by_type.values().copied().sum(),
            by_type,
            charge_count: charges.len() as u64,
        })
    }

    /// Amends a charge while its period is Draft or Processing.
    pub async fn amend_charge(&self, charge_id: Uuid, patch: &ChargePatch) -> EngineResult<Charge> {
        self.ledger.amend(charge_id, patch).await
    }
}
