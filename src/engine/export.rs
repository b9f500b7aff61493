//! Payroll export: serializes a Completed period and hands it to the sink.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{
    BillingPeriod, BillingPeriodStatus, ExportFormat, ExportStatus, PayrollExport,
};
use crate::sources::ExportSink;
use crate::store::{BillingStore, require_period};

use super::ledger::sum_by_type;
use super::render::{ExportDocument, export_file_name, render, summarize_by_staff};
use super::runs::{RunKind, RunRegistry};
use super::{BillingPeriodStateMachine, ChargeLedger};

/// Builds payroll exports for Completed billing periods.
pub struct PayrollExportBuilder {
    store: Arc<dyn BillingStore>,
    state_machine: BillingPeriodStateMachine,
    ledger: Arc<ChargeLedger>,
    sink: Arc<dyn ExportSink>,
    runs: Arc<RunRegistry>,
    sink_timeout: Duration,
    file_prefix: String,
}

impl PayrollExportBuilder {
    /// Creates an export builder writing to `sink`.
    pub fn new(
        store: Arc<dyn BillingStore>,
        ledger: Arc<ChargeLedger>,
        sink: Arc<dyn ExportSink>,
        runs: Arc<RunRegistry>,
        sink_timeout: Duration,
        file_prefix: impl Into<String>,
    ) -> Self {
        Self {
            state_machine: BillingPeriodStateMachine::with_locks(Arc::clone(&store), ledger.period_locks()),
            store,
            ledger,
            sink,
            runs,
            sink_timeout,
            file_prefix: file_prefix.into(),
        }
    }

    /// Exports a Completed period and moves it to Exported.
    ///
    /// If an earlier attempt already produced a Completed export but did not
    /// get to move the period, that export is reused and only the transition
    /// is finished.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` if the period is not Completed
    /// - `InvalidPeriod` if `export_date` precedes the period's end date
    /// - `ConcurrentModification` if another export of the period is running
    /// - `ExportFailure` if serialization or the sink write fails; the export
    ///   is recorded as Failed and the period stays Completed
    pub async fn export(
        &self,
        period_id: Uuid,
        format: ExportFormat,
        export_date: NaiveDate,
    ) -> EngineResult<PayrollExport> {
        let period = require_period(self.store.as_ref(), period_id).await?;
        ensure_exportable(&period, export_date)?;

        let _guard = self.runs.try_claim(period_id, RunKind::Export)?;
        let period = require_period(self.store.as_ref(), period_id).await?;
        ensure_exportable(&period, export_date)?;

        let history = self.store.exports_for_period(period_id).await?;
        if let Some(done) = history
            .iter()
            .rev()
            .find(|e| e.status == ExportStatus::Completed)
        {
            info!(
                period_id = %period_id,
                export_id = %done.id,
                "Completed export found, finishing transition"
            );
            self.state_machine
                .mark_exported(period_id, done.export_date)
                .await?;
            return Ok(done.clone());
        }

        let charges = self.ledger.all_for_period(period_id).await?;
        let summaries = summarize_by_staff(&charges);
        let file_name = export_file_name(
            &self.file_prefix,
            &period.name,
            export_date,
            history.len() + 1,
            format,
        );

        let mut export = PayrollExport::pending(period_id, export_date, file_name, format, Utc::now());
        export.record_count = charges.len() as u64;
        export.total_amount = charges.iter().map(|c| c.amount).sum();
        export.metadata = json!({
            "period_name": period.name,
            "staff_count": summaries.len(),
            "totals_by_type": sum_by_type(&charges),
        });
        self.store.put_export(export.clone()).await?;

        info!(
            period_id = %period_id,
            export_id = %export.id,
            format = %format,
            record_count = export.record_count,
            total_amount = %export.total_amount,
            "Starting payroll export"
        );

        let written = match render(
            format,
            &ExportDocument {
                period: &period,
                export: &export,
                charges: &charges,
                summaries: &summaries,
            },
        ) {
            Ok(bytes) => self.write(&export, bytes).await,
            Err(err) => Err(err),
        };

        let file_size = match written {
            Ok(size) => size,
            Err(err) => {
                let message = match &err {
                    EngineError::ExportFailure { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                warn!(
                    period_id = %period_id,
                    export_id = %export.id,
                    error = %message,
                    "Payroll export failed"
                );
                let failed = export.fail(message.clone(), Utc::now())?;
                let export_id = failed.id;
                self.store.put_export(failed).await?;
                return Err(EngineError::ExportFailure { export_id, message });
            }
        };

        let completed = export.complete(file_size, Utc::now())?;
        self.store.put_export(completed.clone()).await?;
        self.state_machine
            .mark_exported(period_id, export_date)
            .await?;

        info!(
            period_id = %period_id,
            export_id = %completed.id,
            file_name = %completed.file_name,
            file_size = file_size,
            "Payroll export completed"
        );
        Ok(completed)
    }

    async fn write(&self, export: &PayrollExport, bytes: Vec<u8>) -> EngineResult<u64> {
        let size = bytes.len() as u64;
        match tokio::time::timeout(self.sink_timeout, self.sink.write(&export.file_name, &bytes))
            .await
        {
            Ok(Ok(())) => Ok(size),
            Ok(Err(err)) => Err(EngineError::ExportFailure {
                export_id: export.id,
                message: err.to_string(),
            }),
            Err(_) => Err(EngineError::ExportFailure {
                export_id: export.id,
                message: format!(
                    "sink write timed out after {} ms",
                    self.sink_timeout.as_millis()
                ),
            }),
        }
    }
}

fn ensure_exportable(period: &BillingPeriod, export_date: NaiveDate) -> EngineResult<()> {
    if period.status != BillingPeriodStatus::Completed {
        return Err(EngineError::InvalidTransition {
            period_id: period.id,
            from: period.status,
            to: BillingPeriodStatus::Exported,
        });
    }
    if export_date < period.end_date {
        return Err(EngineError::InvalidPeriod {
            message: format!(
                "payroll export date {} precedes end date {}",
                export_date, period.end_date
            ),
        });
    }
    Ok(())
}
