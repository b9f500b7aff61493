//! Activity records reported by external sources.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::calculation::DateSpan;
use crate::error::EngineResult;

use super::ChargeType;

/// One billable activity: a housing occupancy, a trip, or a manual entry.
///
/// `activity_start` is the first day of the activity and `activity_end` the
/// first day after it (a move-out date, or the day after a trip).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Identifier of the activity in its source system.
    pub source_id: String,
    /// The staff member to charge.
    pub staff_id: String,
    /// The kind of charge the activity produces.
    #[serde(rename = "type")]
    pub charge_type: ChargeType,
    /// Full rate before proration. See [`crate::calculation::effective_base_rate`].
    pub base_rate: Decimal,
    /// First day of the activity.
    pub activity_start: NaiveDate,
    /// First day after the activity.
    pub activity_end: NaiveDate,
    /// Number of staff sharing the cost, for transport.
    #[serde(default)]
    pub share_count: Option<u32>,
    /// Description to put on the charge.
    #[serde(default)]
    pub description: Option<String>,
    /// Free-form metadata carried onto the charge.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Activity {
    /// Returns the activity as a validated span.
    pub fn span(&self) -> EngineResult<DateSpan> {
        DateSpan::new(self.activity_start, self.activity_end)
    }

    /// Returns the charge description, falling back to a generated one.
    pub fn charge_description(&self) -> String {
        match &self.description {
            Some(description) if !description.trim().is_empty() => description.clone(),
            _ => format!("{} charge for {}", self.charge_type, self.source_id),
        }
    }
}
