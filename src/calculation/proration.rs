//! Proration of activity spans against a billing period.
//!
//! Every span in this module is half-open: the start day is counted, the end
//! day is not. A tenancy that ends on 2024-02-01 therefore contributes no
//! days to February, and a billing period whose last day is 2024-01-31 is
//! represented as `[2024-01-01, 2024-02-01)`. Counting days this way keeps a
//! month boundary from being billed twice.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::models::ChargeType;

/// A half-open range of calendar days, `[start, end)`.
///
/// # Example
///
/// ```
/// use billing_engine::calculation::DateSpan;
/// use chrono::NaiveDate;
///
/// let january = DateSpan::from_inclusive(
///     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
///     NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
/// )
/// .unwrap();
/// assert_eq!(january.days(), 31);
/// assert_eq!(january.end(), NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSpan {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateSpan {
    /// Creates a span from an inclusive start and exclusive end.
    ///
    /// Returns `InvalidSpan` if `end <= start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> EngineResult<Self> {
        if end <= start {
            return Err(EngineError::InvalidSpan { start, end });
        }
        Ok(Self { start, end })
    }

    /// Creates a span covering `first_day` through `last_day`, both inclusive.
    pub fn from_inclusive(first_day: NaiveDate, last_day: NaiveDate) -> EngineResult<Self> {
        let end = last_day.succ_opt().ok_or(EngineError::InvalidSpan {
            start: first_day,
            end: last_day,
        })?;
        Self::new(first_day, end)
    }

    /// The first day of the span.
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// The first day after the span.
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// The last day inside the span.
    pub fn last_day(&self) -> NaiveDate {
        self.end.pred_opt().unwrap_or(self.start)
    }

    /// Number of days covered by the span. Always at least one.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Returns the intersection of two spans, or `None` if they do not overlap.
    pub fn overlap(&self, other: &DateSpan) -> Option<DateSpan> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (end > start).then_some(DateSpan { start, end })
    }

    /// Returns true if `other` lies entirely within this span.
    pub fn contains(&self, other: &DateSpan) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// What the overlap is measured against when computing a proration factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProrationBasis {
    /// Overlap days over billing-period days. Used for occupancy charges
    /// whose base rate is a full-period rate (rent, utilities).
    PeriodShare,
    /// Overlap days over activity days. Used for point-in-time activity
    /// whose base rate is a per-event cost (trips, manual entries).
    ActivityShare,
}

impl ProrationBasis {
    /// Returns the basis used for a charge type.
    pub fn for_charge_type(charge_type: ChargeType) -> Self {
        match charge_type {
            ChargeType::Rent | ChargeType::Utilities => ProrationBasis::PeriodShare,
            ChargeType::Transport | ChargeType::Other => ProrationBasis::ActivityShare,
        }
    }
}

/// The outcome of prorating one activity span against a billing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proration {
    /// The proration factor, in `[0, 1]`.
    pub factor: Decimal,
    /// The overlapping days, if any.
    pub overlap: Option<DateSpan>,
    /// Number of overlapping days.
    pub overlap_days: i64,
    /// Number of days the overlap was divided by.
    pub basis_days: i64,
}

impl Proration {
    /// Returns true if the activity should produce a charge.
    pub fn is_chargeable(&self) -> bool {
        self.factor > Decimal::ZERO
    }

    /// Applies the factor to a base amount without rounding.
    pub fn apply(&self, base: Decimal) -> Decimal {
        base * self.factor
    }
}

/// Computes the proration factor of an activity against a billing period.
///
/// The factor is the number of overlapping days divided by the number of
/// days in the billing period, clamped to `[0, 1]`. An activity that covers
/// the whole period gets exactly `1`; one that misses it gets `0`, and the
/// caller must not create a charge for it.
///
/// # Errors
///
/// Returns `InvalidSpan` if `activity_end <= activity_start`.
///
/// # Examples
///
/// ```
/// use billing_engine::calculation::{prorate, DateSpan};
/// use chrono::NaiveDate;
/// use rust_decimal::Decimal;
///
/// let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
/// let january = DateSpan::from_inclusive(d(2024, 1, 1), d(2024, 1, 31)).unwrap();
///
/// // Tenancy running from mid-December into February covers all of January.
/// let full = prorate(d(2023, 12, 16), d(2024, 2, 1), january).unwrap();
/// assert_eq!(full.factor, Decimal::ONE);
///
/// // Moving in on the 16th leaves 16 of 31 days.
/// let partial = prorate(d(2024, 1, 16), d(2024, 2, 15), january).unwrap();
/// assert_eq!(partial.overlap_days, 16);
/// assert_eq!(partial.basis_days, 31);
///
/// // Activity after the period is not chargeable.
/// let none = prorate(d(2024, 2, 1), d(2024, 2, 10), january).unwrap();
/// assert!(!none.is_chargeable());
/// ```
pub fn prorate(
    activity_start: NaiveDate,
    activity_end: NaiveDate,
    period: DateSpan,
) -> EngineResult<Proration> {
    let activity = DateSpan::new(activity_start, activity_end)?;
    Ok(prorate_with_basis(
        &activity,
        &period,
        ProrationBasis::PeriodShare,
    ))
}

/// Computes a proration factor using an explicit basis.
///
/// With [`ProrationBasis::ActivityShare`] an activity entirely inside the
/// period gets a factor of `1`, and one straddling a boundary is scaled by
/// the share of its own days that fall inside.
pub fn prorate_with_basis(
    activity: &DateSpan,
    period: &DateSpan,
    basis: ProrationBasis,
) -> Proration {
    let basis_days = match basis {
        ProrationBasis::PeriodShare => period.days(),
        ProrationBasis::ActivityShare => activity.days(),
    };

    let Some(overlap) = activity.overlap(period) else {
        return Proration {
            factor: Decimal::ZERO,
            overlap: None,
            overlap_days: 0,
            basis_days,
        };
    };

    let overlap_days = overlap.days();
    let factor = if overlap_days >= basis_days {
        Decimal::ONE
    } else {
        Decimal::from(overlap_days) / Decimal::from(basis_days)
    };

    Proration {
        factor,
        overlap: Some(overlap),
        overlap_days,
        basis_days,
    }
}
