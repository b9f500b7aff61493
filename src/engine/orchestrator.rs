//! Charge generation: turns source activity into ledger charges.
//!
//! A run moves the period Draft -> Processing, consumes each activity source
//! in order, prorates every activity against the period, and appends the
//! resulting charges. When every source has been consumed the period moves
//! to Completed. A failing source halts the run and leaves the period in
//! Processing with everything appended so far; running again resumes, and
//! the ledger's per-`source_id` idempotence keeps already-charged activity
//! from being charged twice.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::calculation::{
    DateSpan, ProrationBasis, charge_amount, effective_base_rate, prorate_with_basis,
};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    Activity, BillingPeriod, BillingPeriodStatus, NewCharge, ProcessingReport,
};
use crate::sources::ActivitySource;
use crate::store::{BillingStore, require_period};

use super::ledger::AppendOutcome;
use super::runs::{ProgressRegistry, RunGuard, RunKind, RunRegistry};
use super::{BillingPeriodStateMachine, ChargeLedger};

/// A processing run that has been claimed and may now execute.
///
/// Holding one means the period is in Processing and no other processing
/// run is active for it. The claim is released when the run is dropped.
#[derive(Debug)]
pub struct ClaimedRun {
    period: BillingPeriod,
    _guard: RunGuard,
}

impl ClaimedRun {
    /// The period as it was when the run was claimed.
    pub fn period(&self) -> &BillingPeriod {
        &self.period
    }
}

/// Builds the charge for one activity, or `None` if the activity does not
/// overlap the period or its amount rounds to zero.
///
/// # Errors
///
/// `InvalidSpan` or `InvalidCharge` if the activity itself is malformed.
pub fn charge_for_activity(
    activity: &Activity,
    period: &DateSpan,
    source_name: &str,
    currency_decimals: u32,
) -> EngineResult<Option<NewCharge>> {
    let span = activity.span()?;
    let basis = ProrationBasis::for_charge_type(activity.charge_type);
    let proration = prorate_with_basis(&span, period, basis);

    let Some(overlap) = proration.overlap else {
        return Ok(None);
    };
    let amount = charge_amount(activity, &proration, currency_decimals)?;
    if amount <= rust_decimal::Decimal::ZERO {
        return Ok(None);
    }

    let metadata = json!({
        "source": source_name,
        "base_rate": effective_base_rate(activity)?,
        "overlap_days": proration.overlap_days,
        "basis_days": proration.basis_days,
        "activity_start": activity.activity_start,
        "activity_end": activity.activity_end,
        "activity": activity.metadata,
    });

    Ok(Some(
        NewCharge::new(
            activity.staff_id.clone(),
            activity.charge_type,
            amount,
            activity.charge_description(),
        )
        .with_source_name(source_name)
        .with_source(activity.source_id.clone())
        .with_proration(proration.factor, overlap.start(), overlap.last_day())
        .with_metadata(metadata),
    ))
}

/// Drives charge generation runs.
pub struct ChargeOrchestrator {
    store: Arc<dyn BillingStore>,
    state_machine: BillingPeriodStateMachine,
    ledger: Arc<ChargeLedger>,
    sources: Vec<Arc<dyn ActivitySource>>,
    runs: Arc<RunRegistry>,
    progress: Arc<ProgressRegistry>,
    source_timeout: Duration,
    currency_decimals: u32,
}

impl ChargeOrchestrator {
    /// Creates an orchestrator. `sources` are consumed in the given order.
    pub fn new(
        store: Arc<dyn BillingStore>,
        ledger: Arc<ChargeLedger>,
        sources: Vec<Arc<dyn ActivitySource>>,
        runs: Arc<RunRegistry>,
        progress: Arc<ProgressRegistry>,
        source_timeout: Duration,
        currency_decimals: u32,
    ) -> Self {
        Self {
            state_machine: BillingPeriodStateMachine::with_locks(Arc::clone(&store), ledger.period_locks()),
            store,
            ledger,
            sources,
            runs,
            progress,
            source_timeout,
            currency_decimals,
        }
    }

    /// Names of the sources, in consumption order.
    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Claims a processing run for a period.
    ///
    /// A Draft period moves to Processing; a Processing period left behind
    /// by a failed run is resumed as-is.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` if the period is Completed, Exported or Cancelled
    /// - `ConcurrentModification` if another run holds the period
    pub async fn claim(&self, period_id: Uuid) -> EngineResult<ClaimedRun> {
        let period = require_period(self.store.as_ref(), period_id).await?;
        ensure_processable(&period)?;

        let guard = self.runs.try_claim(period_id, RunKind::Processing)?;

        let period = require_period(self.store.as_ref(), period_id).await?;
        let period = match period.status {
            BillingPeriodStatus::Draft => self.state_machine.begin_processing(period_id).await?,
            BillingPeriodStatus::Processing => {
                info!(period_id = %period_id, "Resuming processing run");
                period
            }
            _ => {
                ensure_processable(&period)?;
                period
            }
        };

        self.progress.start(period_id, self.sources.len());
        Ok(ClaimedRun {
            period,
            _guard: guard,
        })
    }

    /// Runs every source for a claimed period and completes it.
    ///
    /// # Errors
    ///
    /// `SourceFailure` naming the first source that failed, timed out, or
    /// reported malformed activity. The period stays Processing.
    pub async fn execute(&self, run: ClaimedRun) -> EngineResult<ProcessingReport> {
        let started = Instant::now();
        let period = run.period();
        let period_id = period.id;
        let period_span = period.span()?;

        let mut report = ProcessingReport {
            period_id,
            status: period.status,
            charges_appended: 0,
            duplicates_skipped: 0,
            not_chargeable_skipped: 0,
            totals: Default::default(),
            duration_us: 0,
        };

        info!(
            period_id = %period_id,
            period_name = %period.name,
            sources = self.sources.len(),
            "Starting charge generation"
        );

        for source in &self.sources {
            let source_name = source.name().to_string();
            self.progress.update(period_id, |p| {
                p.current_source = Some(source_name.clone());
            });

            if let Err(err) = self
                .consume_source(source.as_ref(), period, &period_span, &mut report)
                .await
            {
                let cause = match &err {
                    EngineError::SourceFailure { cause, .. } => cause.clone(),
                    other => other.to_string(),
                };
                warn!(
                    period_id = %period_id,
                    source = %source_name,
                    cause = %cause,
                    charges_appended = report.charges_appended,
                    "Charge generation halted"
                );
                self.progress.fail(period_id, &source_name, &cause);
                return Err(err);
            }

            self.progress.update(period_id, |p| {
                p.sources_processed += 1;
            });
        }

        let completed = self.state_machine.complete_processing(period_id).await?;
        self.progress.complete(period_id);

        report.status = completed.status;
        report.totals = self.ledger.totals_by_type(period_id).await?;
        report.duration_us = started.elapsed().as_micros() as u64;

        info!(
            period_id = %period_id,
            charges_appended = report.charges_appended,
            duplicates_skipped = report.duplicates_skipped,
            not_chargeable_skipped = report.not_chargeable_skipped,
            duration_us = report.duration_us,
            "Charge generation completed"
        );
        Ok(report)
    }

    /// Claims and executes a run in one call.
    pub async fn process(&self, period_id: Uuid) -> EngineResult<ProcessingReport> {
        let run = self.claim(period_id).await?;
        self.execute(run).await
    }

    async fn consume_source(
        &self,
        source: &dyn ActivitySource,
        period: &BillingPeriod,
        period_span: &DateSpan,
        report: &mut ProcessingReport,
    ) -> EngineResult<()> {
        let source_name = source.name();
        let activities = self
            .fetch(source, period.start_date, period.end_date)
            .await?;

        info!(
            period_id = %period.id,
            source = %source_name,
            activities = activities.len(),
            "Fetched activity"
        );

        for activity in &activities {
            let new_charge =
                charge_for_activity(activity, period_span, source_name, self.currency_decimals)
                    .map_err(|err| malformed(source_name, activity, err))?;

            let Some(new_charge) = new_charge else {
                report.not_chargeable_skipped += 1;
                self.progress
                    .update(period.id, |p| p.not_chargeable_skipped += 1);
                continue;
            };

            match self.ledger.append(period.id, new_charge).await {
                Ok(AppendOutcome::Appended(_)) => {
                    report.charges_appended += 1;
                    self.progress.update(period.id, |p| p.charges_appended += 1);
                }
                Ok(AppendOutcome::AlreadyCharged(_)) => {
                    report.duplicates_skipped += 1;
                    self.progress
                        .update(period.id, |p| p.duplicates_skipped += 1);
                }
                Err(err @ EngineError::InvalidCharge { .. }) => {
                    return Err(malformed(source_name, activity, err));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn fetch(
        &self,
        source: &dyn ActivitySource,
        start: NaiveDate,
        end: NaiveDate,
    ) -> EngineResult<Vec<Activity>> {
        match tokio::time::timeout(self.source_timeout, source.fetch_activity(start, end)).await {
            Ok(Ok(activities)) => Ok(activities),
            Ok(Err(err)) => Err(EngineError::SourceFailure {
                source_name: source.name().to_string(),
                cause: err.to_string(),
            }),
            Err(_) => Err(EngineError::SourceFailure {
                source_name: source.name().to_string(),
                cause: format!("timed out after {} ms", self.source_timeout.as_millis()),
            }),
        }
    }
}

fn ensure_processable(period: &BillingPeriod) -> EngineResult<()> {
    match period.status {
        BillingPeriodStatus::Draft | BillingPeriodStatus::Processing => Ok(()),
        from => Err(EngineError::InvalidTransition {
            period_id: period.id,
            from,
            to: BillingPeriodStatus::Processing,
        }),
    }
}

fn malformed(source_name: &str, activity: &Activity, err: EngineError) -> EngineError {
    EngineError::SourceFailure {
        source_name: source_name.to_string(),
        cause: format!("activity '{}': {}", activity.source_id, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculation::TOTAL_TOLERANCE;
    use crate::models::{ChargeType, RunState};
    use crate::sources::{ManualActivitySource, SourceError};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn activity(
        source_id: &str,
        charge_type: ChargeType,
        base_rate: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Activity {
        Activity {
            source_id: source_id.to_string(),
            staff_id: "staff-1".to_string(),
            charge_type,
            base_rate: dec(base_rate),
            activity_start: start,
            activity_end: end,
            share_count: None,
            description: None,
            metadata: serde_json::Value::Null,
        }
    }

    struct FailingSource;

    #[async_trait]
    impl ActivitySource for FailingSource {
        fn name(&self) -> &str {
            "transport"
        }

        async fn fetch_activity(
            &self,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<Activity>, SourceError> {
            Err(SourceError::Unavailable("connection refused".to_string()))
        }
    }

    struct SlowSource;

    #[async_trait]
    impl ActivitySource for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }

        async fn fetch_activity(
            &self,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<Activity>, SourceError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    struct Fixture {
        store: Arc<dyn BillingStore>,
        ledger: Arc<ChargeLedger>,
        progress: Arc<ProgressRegistry>,
        period_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn BillingStore> = Arc::new(InMemoryStore::new());
        let period = BillingPeriod::new("2024-01", d(2024, 1, 1), d(2024, 1, 31), Utc::now()).unwrap();
        let period_id = period.id;
        store.insert_period(period).await.unwrap();
        Fixture {
            ledger: Arc::new(ChargeLedger::new(Arc::clone(&store), TOTAL_TOLERANCE)),
            store,
            progress: Arc::new(ProgressRegistry::new()),
            period_id,
        }
    }

    fn orchestrator(f: &Fixture, sources: Vec<Arc<dyn ActivitySource>>) -> ChargeOrchestrator {
        ChargeOrchestrator::new(
            Arc::clone(&f.store),
            Arc::clone(&f.ledger),
            sources,
            Arc::new(RunRegistry::new()),
            Arc::clone(&f.progress),
            Duration::from_millis(50),
            2,
        )
    }

    #[test]
    fn test_charge_for_activity_prorates_rent() {
        let january = DateSpan::from_inclusive(d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        let moved_in = activity("a-1", ChargeType::Rent, "850.00", d(2024, 1, 16), d(2024, 3, 1));

        let charge = charge_for_activity(&moved_in, &january, "housing", 2)
            .unwrap()
            .unwrap();
        assert_eq!(charge.amount, dec("438.71"));
        assert_eq!(charge.start_date, Some(d(2024, 1, 16)));
        assert_eq!(charge.end_date, Some(d(2024, 1, 31)));
        assert_eq!(charge.metadata["overlap_days"], 16);
        assert_eq!(charge.source_id.as_deref(), Some("a-1"));
        assert_eq!(charge.source_name.as_deref(), Some("housing"));
    }

    #[test]
    fn test_charge_for_activity_outside_period() {
        let january = DateSpan::from_inclusive(d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        let later = activity("a-1", ChargeType::Rent, "850.00", d(2024, 2, 1), d(2024, 3, 1));
        assert!(
            charge_for_activity(&later, &january, "housing", 2)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_charge_for_activity_rejects_inverted_span() {
        let january = DateSpan::from_inclusive(d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        let inverted = activity("a-1", ChargeType::Rent, "850.00", d(2024, 1, 20), d(2024, 1, 10));
        assert!(matches!(
            charge_for_activity(&inverted, &january, "housing", 2),
            Err(EngineError::InvalidSpan { .. })
        ));
    }

    #[tokio::test]
    async fn test_process_completes_period() {
        let f = fixture().await;
        let housing = Arc::new(ManualActivitySource::new("housing"));
        housing
            .record(activity("a-1", ChargeType::Rent, "850.00", d(2023, 12, 1), d(2024, 3, 1)))
            .await;
        housing
            .record(activity("a-2", ChargeType::Rent, "850.00", d(2024, 1, 16), d(2024, 3, 1)))
            .await;
        housing
            .record(activity("a-3", ChargeType::Rent, "850.00", d(2024, 2, 1), d(2024, 3, 1)))
            .await;

        let report = orchestrator(&f, vec![housing as Arc<dyn ActivitySource>])
            .process(f.period_id)
            .await
            .unwrap();

        assert_eq!(report.status, BillingPeriodStatus::Completed);
        assert_eq!(report.charges_appended, 2);
        assert_eq!(report.totals[&ChargeType::Rent], dec("1288.71"));

        let progress = f.progress.get(f.period_id).unwrap();
        assert_eq!(progress.state, RunState::Completed);
        assert_eq!(progress.sources_processed, 1);
    }

    #[tokio::test]
    async fn test_source_failure_keeps_period_processing() {
        let f = fixture().await;
        let housing = Arc::new(ManualActivitySource::new("housing"));
        housing
            .record(activity("a-1", ChargeType::Rent, "850.00", d(2024, 1, 1), d(2024, 2, 1)))
            .await;

        let result = orchestrator(&f, vec![housing as Arc<dyn ActivitySource>, Arc::new(FailingSource)])
            .process(f.period_id)
            .await;

        match result {
            Err(EngineError::SourceFailure { source_name, cause }) => {
                assert_eq!(source_name, "transport");
                assert!(cause.contains("connection refused"));
            }
            other => panic!("expected SourceFailure, got {other:?}"),
        }
        let period = f.store.get_period(f.period_id).await.unwrap().unwrap();
        assert_eq!(period.status, BillingPeriodStatus::Processing);
        assert_eq!(f.ledger.all_for_period(f.period_id).await.unwrap().len(), 1);
        assert_eq!(f.progress.get(f.period_id).unwrap().state, RunState::Failed);
    }

    #[tokio::test]
    async fn test_source_timeout_is_a_failure() {
        let f = fixture().await;
        let result = orchestrator(&f, vec![Arc::new(SlowSource) as Arc<dyn ActivitySource>])
            .process(f.period_id)
            .await;
        assert!(matches!(
            result,
            Err(EngineError::SourceFailure { ref cause, .. }) if cause.contains("timed out")
        ));
    }

    #[tokio::test]
    async fn test_malformed_activity_is_a_source_failure() {
        let f = fixture().await;
        let housing = Arc::new(ManualActivitySource::new("housing"));
        let mut bad = activity("a-1", ChargeType::Rent, "850.00", d(2024, 1, 1), d(2024, 2, 1));
        bad.staff_id = String::new();
        housing.record(bad).await;

        let result = orchestrator(&f, vec![housing as Arc<dyn ActivitySource>])
            .process(f.period_id)
            .await;
        assert!(matches!(
            result,
            Err(EngineError::SourceFailure { ref source_name, .. }) if source_name == "housing"
        ));
    }

    #[tokio::test]
    async fn test_completed_period_is_not_reprocessed() {
        let f = fixture().await;
        let orchestrator = orchestrator(&f, Vec::new());
        orchestrator.process(f.period_id).await.unwrap();

        let result = orchestrator.process(f.period_id).await;
        assert!(matches!(
            result,
            Err(EngineError::InvalidTransition {
                from: BillingPeriodStatus::Completed,
                to: BillingPeriodStatus::Processing,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let f = fixture().await;
        let orchestrator = orchestrator(&f, Vec::new());
        let _run = orchestrator.claim(f.period_id).await.unwrap();
        let second = orchestrator.claim(f.period_id).await;
        assert!(matches!(
            second,
            Err(EngineError::ConcurrentModification { .. })
        ));
    }
}
