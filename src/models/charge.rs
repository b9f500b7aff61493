//! Charge models.
//!
//! A [`Charge`] is one monetary obligation attributed to one staff member
//! within one billing period. Charges are written through the
//! [`crate::engine::ChargeLedger`], which calls [`Charge::validate`] before
//! every write.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calculation::{TotalComponents, check_total_with_tolerance};
use crate::error::{EngineError, EngineResult};

use super::BillingPeriod;

/// Maximum length of a charge description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// The kind of obligation a charge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeType {
    /// Housing rent.
    Rent,
    /// Housing utilities.
    Utilities,
    /// Transport trips.
    Transport,
    /// Anything else, including manual entries and offsetting corrections.
    Other,
}

impl ChargeType {
    /// All charge types, in reporting order.
    pub const ALL: [ChargeType; 4] = [
        ChargeType::Rent,
        ChargeType::Utilities,
        ChargeType::Transport,
        ChargeType::Other,
    ];

    /// Returns the lowercase name of the charge type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeType::Rent => "rent",
            ChargeType::Utilities => "utilities",
            ChargeType::Transport => "transport",
            ChargeType::Other => "other",
        }
    }
}

impl fmt::Display for ChargeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted charge.
///
/// `start_date` and `end_date` are the first and last charged days, both
/// inclusive and both within the owning billing period.
///
/// An activity is identified by the pair (`source_name`, `source_id`): two
/// sources may use the same raw id for unrelated activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    /// Unique identifier.
    pub id: Uuid,
    /// The staff member the charge is attributed to.
    pub staff_id: String,
    /// The owning billing period. Never changes after creation.
    pub billing_period_id: Uuid,
    /// The kind of charge.
    #[serde(rename = "type")]
    pub charge_type: ChargeType,
    /// The charged amount, before tax and discount.
    pub amount: Decimal,
    /// Human-readable description.
    pub description: String,
    /// Fraction of the full rate that was charged.
    pub proration_factor: Decimal,
    /// Name of the activity source that produced the charge.
    #[serde(default)]
    pub source_name: Option<String>,
    /// Back-reference to the originating activity within its source.
    #[serde(default)]
    pub source_id: Option<String>,
    /// First charged day.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Last charged day.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Operator notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Tax added to the amount.
    #[serde(default)]
    pub tax_amount: Option<Decimal>,
    /// Discount subtracted from the amount.
    #[serde(default)]
    pub discount_amount: Option<Decimal>,
    /// `amount + tax - discount`. Always derived, never supplied.
    pub total_amount: Decimal,
    /// Creation order within the billing period.
    pub sequence: u64,
    /// When the charge was created.
    pub created_at: DateTime<Utc>,
    /// When the charge was last amended.
    pub updated_at: DateTime<Utc>,
}

impl Charge {
    /// Returns the components the total is derived from.
    pub fn total_components(&self) -> TotalComponents {
        TotalComponents {
            amount: self.amount,
            tax_amount: self.tax_amount,
            discount_amount: self.discount_amount,
        }
    }

    /// Checks every per-charge invariant against the owning period.
    ///
    /// Returns `InvalidCharge` naming the first violated field.
    pub fn validate(&self, period: &BillingPeriod, tolerance: Decimal) -> EngineResult<()> {
        if self.billing_period_id != period.id {
            return Err(EngineError::invalid_charge(
                "billing_period_id",
                format!(
                    "charge belongs to {} but was checked against {}",
                    self.billing_period_id, period.id
                ),
            ));
        }
        if self.staff_id.trim().is_empty() {
            return Err(EngineError::invalid_charge("staff_id", "must not be empty"));
        }
        if self.amount <= Decimal::ZERO {
            return Err(EngineError::invalid_charge(
                "amount",
                format!("must be greater than zero, got {}", self.amount),
            ));
        }
        if self.description.trim().is_empty() {
            return Err(EngineError::invalid_charge("description", "must not be empty"));
        }
        let description_len = self.description.chars().count();
        if description_len > MAX_DESCRIPTION_LEN {
            return Err(EngineError::invalid_charge(
                "description",
                format!(
                    "must be at most {} characters, got {}",
                    MAX_DESCRIPTION_LEN, description_len
                ),
            ));
        }
        if self.proration_factor < Decimal::ZERO || self.proration_factor > Decimal::ONE {
            return Err(EngineError::invalid_charge(
                "proration_factor",
                format!("must be within [0, 1], got {}", self.proration_factor),
            ));
        }
        if self.tax_amount.is_some_and(|tax| tax < Decimal::ZERO) {
            return Err(EngineError::invalid_charge("tax_amount", "must not be negative"));
        }
        if self
            .discount_amount
            .is_some_and(|discount| discount < Decimal::ZERO)
        {
            return Err(EngineError::invalid_charge(
                "discount_amount",
                "must not be negative",
            ));
        }
        self.validate_span(period)?;

        check_total_with_tolerance(&self.total_components(), self.total_amount, tolerance)
            .map_err(|violation| EngineError::invalid_charge("total_amount", violation.to_string()))
    }

    fn validate_span(&self, period: &BillingPeriod) -> EngineResult<()> {
        let within = |date: NaiveDate| date >= period.start_date && date <= period.end_date;

        if let Some(start) = self.start_date {
            if !within(start) {
                return Err(EngineError::invalid_charge(
                    "start_date",
                    format!(
                        "{} is outside billing period {} to {}",
                        start, period.start_date, period.end_date
                    ),
                ));
            }
        }
        if let Some(end) = self.end_date {
            if !within(end) {
                return Err(EngineError::invalid_charge(
                    "end_date",
                    format!(
                        "{} is outside billing period {} to {}",
                        end, period.start_date, period.end_date
                    ),
                ));
            }
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(EngineError::invalid_charge(
                    "end_date",
                    format!("{} is before start date {}", end, start),
                ));
            }
        }
        Ok(())
    }

    /// Returns a copy with the patch applied and the total re-derived.
    pub fn with_patch(&self, patch: &ChargePatch, now: DateTime<Utc>) -> Charge {
        let mut merged = self.clone();
        if let Some(amount) = patch.amount {
            merged.amount = amount;
        }
        if let Some(description) = &patch.description {
            merged.description = description.clone();
        }
        if let Some(notes) = &patch.notes {
            merged.notes = Some(notes.clone());
        }
        if let Some(tax) = patch.tax_amount {
            merged.tax_amount = Some(tax);
        }
        if let Some(discount) = patch.discount_amount {
            merged.discount_amount = Some(discount);
        }
        merged.total_amount = merged.total_components().derive_total();
        merged.updated_at = now;
        merged
    }
}

/// A charge about to be appended to the ledger.
///
/// # Example
///
/// ```
/// use billing_engine::models::{ChargeType, NewCharge};
/// use rust_decimal::Decimal;
///
/// let charge = NewCharge::new("staff-9", ChargeType::Other, Decimal::new(2500, 2), "Parking permit")
///     .with_source("manual-31")
///     .with_notes("Approved by facilities");
/// assert_eq!(charge.proration_factor, Decimal::ONE);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCharge {
    /// The staff member the charge is attributed to.
    pub staff_id: String,
    /// The kind of charge.
    #[serde(rename = "type")]
    pub charge_type: ChargeType,
    /// The charged amount.
    pub amount: Decimal,
    /// Human-readable description.
    pub description: String,
    /// Fraction of the full rate that was charged.
    #[serde(default = "full_period")]
    pub proration_factor: Decimal,
    /// Name of the activity source that produced the charge.
    #[serde(default)]
    pub source_name: Option<String>,
    /// Back-reference to the originating activity within its source.
    #[serde(default)]
    pub source_id: Option<String>,
    /// First charged day.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Last charged day.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Operator notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Tax added to the amount.
    #[serde(default)]
    pub tax_amount: Option<Decimal>,
    /// Discount subtracted from the amount.
    #[serde(default)]
    pub discount_amount: Option<Decimal>,
}

fn full_period() -> Decimal {
    Decimal::ONE
}

impl NewCharge {
    /// Creates a full-period charge with no span, source, or adjustments.
    pub fn new(
        staff_id: impl Into<String>,
        charge_type: ChargeType,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            staff_id: staff_id.into(),
            charge_type,
            amount,
            description: description.into(),
            proration_factor: Decimal::ONE,
            source_name: None,
            source_id: None,
            start_date: None,
            end_date: None,
            notes: None,
            metadata: serde_json::Value::Null,
            tax_amount: None,
            discount_amount: None,
        }
    }

    /// Sets the originating activity.
    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Sets the name of the source the activity came from.
    pub fn with_source_name(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = Some(source_name.into());
        self
    }

    /// Sets the charged days, `first_day` through `last_day` inclusive, and
    /// their proration factor.
    pub fn with_proration(mut self, factor: Decimal, first_day: NaiveDate, last_day: NaiveDate) -> Self {
        self.proration_factor = factor;
        self.start_date = Some(first_day);
        self.end_date = Some(last_day);
        self
    }

    /// Returns true if `charge` records the same activity.
    ///
    /// Charges without a `source_id` never match.
    pub fn same_activity(&self, charge: &Charge) -> bool {
        self.source_id.is_some()
            && self.source_id == charge.source_id
            && self.source_name == charge.source_name
    }

    /// Sets operator notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Sets free-form metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets tax and discount adjustments.
    pub fn with_adjustments(mut self, tax: Option<Decimal>, discount: Option<Decimal>) -> Self {
        self.tax_amount = tax;
        self.discount_amount = discount;
        self
    }

    /// Builds the persisted charge, deriving its total.
    pub fn into_charge(self, billing_period_id: Uuid, sequence: u64, now: DateTime<Utc>) -> Charge {
        let total_amount = TotalComponents {
            amount: self.amount,
            tax_amount: self.tax_amount,
            discount_amount: self.discount_amount,
        }
        .derive_total();

        Charge {
            id: Uuid::new_v4(),
            staff_id: self.staff_id,
            billing_period_id,
            charge_type: self.charge_type,
            amount: self.amount,
            description: self.description,
            proration_factor: self.proration_factor,
            source_name: self.source_name,
            source_id: self.source_id,
            start_date: self.start_date,
            end_date: self.end_date,
            notes: self.notes,
            metadata: self.metadata,
            tax_amount: self.tax_amount,
            discount_amount: self.discount_amount,
            total_amount,
            sequence,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fields an operator may change on an existing charge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargePatch {
    /// New amount.
    pub amount: Option<Decimal>,
    /// New description.
    pub description: Option<String>,
    /// New notes.
    pub notes: Option<String>,
    /// New tax amount.
    pub tax_amount: Option<Decimal>,
    /// New discount amount.
    pub discount_amount: Option<Decimal>,
}

/// Criteria for listing charges. Empty criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargeFilter {
    /// Only charges for this staff member.
    pub staff_id: Option<String>,
    /// Only charges of this type.
    #[serde(rename = "type")]
    pub charge_type: Option<ChargeType>,
    /// Only charges from this source.
    pub source_id: Option<String>,
}

impl ChargeFilter {
    /// Returns true if the charge satisfies every set criterion.
    pub fn matches(&self, charge: &Charge) -> bool {
        self.staff_id
            .as_deref()
            .is_none_or(|staff| charge.staff_id == staff)
            && self
                .charge_type
                .is_none_or(|charge_type| charge.charge_type == charge_type)
            && self
                .source_id
                .as_deref()
                .is_none_or(|source| charge.source_id.as_deref() == Some(source))
    }
}
