//! Calculation logic for the Billing Engine.
//!
//! This module contains the pure functions charges are built from: span
//! proration, base rate derivation for each charge type, monetary rounding,
//! and the derived-total check shared by every record that carries a total.

mod base_rate;
mod proration;
mod transaction_total;

pub use base_rate::{DEFAULT_CURRENCY_DECIMALS, charge_amount, effective_base_rate, round_money};
pub use proration::{DateSpan, Proration, ProrationBasis, prorate, prorate_with_basis};
pub use transaction_total::{
    TOTAL_TOLERANCE, TotalComponents, TotalViolation, check_total, check_total_with_tolerance,
};
