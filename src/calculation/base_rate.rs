//! Base rate derivation and charge amount calculation.
//!
//! Each activity source reports a `base_rate` whose meaning depends on the
//! charge type:
//!
//! - Rent and utilities: the monthly rate for the unit. Prorated over the
//!   billing period this becomes `monthly / period days * overlap days`.
//! - Transport: the full trip cost, shared equally between passengers.
//! - Other: a flat per-entry amount.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{EngineError, EngineResult};
use crate::models::{Activity, ChargeType};

use super::proration::Proration;

/// Number of decimal places charge amounts are rounded to.
pub const DEFAULT_CURRENCY_DECIMALS: u32 = 2;

/// Returns the per-staff rate an activity is billed at before proration.
///
/// # Errors
///
/// Returns `InvalidCharge` if the base rate is not positive or a transport
/// activity reports zero passengers.
///
/// # Examples
///
/// ```
/// use billing_engine::calculation::effective_base_rate;
/// use billing_engine::models::{Activity, ChargeType};
/// use chrono::NaiveDate;
/// use rust_decimal::Decimal;
/// use std::str::FromStr;
///
/// let trip = Activity {
///     source_id: "trip-17".to_string(),
///     staff_id: "staff-4".to_string(),
///     charge_type: ChargeType::Transport,
///     base_rate: Decimal::from_str("90.00").unwrap(),
///     activity_start: NaiveDate::from_ymd_opt(2024, 1, 12).unwrap(),
///     activity_end: NaiveDate::from_ymd_opt(2024, 1, 13).unwrap(),
///     share_count: Some(3),
///     description: None,
///     metadata: serde_json::Value::Null,
/// };
/// assert_eq!(effective_base_rate(&trip).unwrap(), Decimal::from_str("30.00").unwrap());
/// ```
pub fn effective_base_rate(activity: &Activity) -> EngineResult<Decimal> {
    if activity.base_rate <= Decimal::ZERO {
        return Err(EngineError::invalid_charge(
            "base_rate",
            format!(
                "activity '{}' reported non-positive base rate {}",
                activity.source_id, activity.base_rate
            ),
        ));
    }

    match activity.charge_type {
        ChargeType::Transport => {
            let passengers = activity.share_count.unwrap_or(1);
            if passengers == 0 {
                return Err(EngineError::invalid_charge(
                    "share_count",
                    format!("trip '{}' has no passengers", activity.source_id),
                ));
            }
            Ok(activity.base_rate / Decimal::from(passengers))
        }
        ChargeType::Rent | ChargeType::Utilities | ChargeType::Other => Ok(activity.base_rate),
    }
}

/// Rounds a monetary value to `decimals` places, half away from zero.
///
/// ```
/// use billing_engine::calculation::round_money;
/// use rust_decimal::Decimal;
/// use std::str::FromStr;
///
/// let raw = Decimal::from_str("438.709677").unwrap();
/// assert_eq!(round_money(raw, 2), Decimal::from_str("438.71").unwrap());
/// ```
pub fn round_money(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
}

/// Computes the rounded charge amount for a prorated activity.
pub fn charge_amount(
    activity: &Activity,
    proration: &Proration,
    decimals: u32,
) -> EngineResult<Decimal> {
    let rate = effective_base_rate(activity)?;
    Ok(round_money(proration.apply(rate), decimals))
}
