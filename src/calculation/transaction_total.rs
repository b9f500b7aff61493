//! Derived-total checks for monetary records.
//!
//! Any record that carries `amount`, optional `tax_amount`, optional
//! `discount_amount` and a `total_amount` must satisfy
//! `total_amount == amount + tax_amount - discount_amount` within one cent.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Rounding slack allowed between a stored total and its components.
pub const TOTAL_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// The components a derived total is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalComponents {
    /// The base amount.
    pub amount: Decimal,
    /// Tax added on top of the amount.
    pub tax_amount: Option<Decimal>,
    /// Discount subtracted from the amount.
    pub discount_amount: Option<Decimal>,
}

impl TotalComponents {
    /// Creates components with no tax or discount.
    pub fn from_amount(amount: Decimal) -> Self {
        Self {
            amount,
            tax_amount: None,
            discount_amount: None,
        }
    }

    /// Computes `amount + tax - discount`.
    ///
    /// Creation flows call this instead of accepting a caller-supplied total.
    ///
    /// # Example
    ///
    /// ```
    /// use billing_engine::calculation::TotalComponents;
    /// use rust_decimal::Decimal;
    /// use std::str::FromStr;
    ///
    /// let components = TotalComponents {
    ///     amount: Decimal::from_str("100.00").unwrap(),
    ///     tax_amount: Some(Decimal::from_str("15.00").unwrap()),
    ///     discount_amount: Some(Decimal::from_str("5.00").unwrap()),
    /// };
    /// assert_eq!(components.derive_total(), Decimal::from_str("110.00").unwrap());
    /// ```
    pub fn derive_total(&self) -> Decimal {
        self.amount + self.tax_amount.unwrap_or(Decimal::ZERO)
            - self.discount_amount.unwrap_or(Decimal::ZERO)
    }
}

/// A stored total that disagrees with its components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalViolation {
    /// The total derived from the components.
    pub expected: Decimal,
    /// The total that was stored or supplied.
    pub actual: Decimal,
    /// `actual - expected`.
    pub difference: Decimal,
}

impl fmt::Display for TotalViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total {} does not equal amount + tax - discount = {} (off by {})",
            self.actual, self.expected, self.difference
        )
    }
}

/// Checks a total against its components using [`TOTAL_TOLERANCE`].
///
/// # Examples
///
/// ```
/// use billing_engine::calculation::{check_total, TotalComponents};
/// use rust_decimal::Decimal;
/// use std::str::FromStr;
///
/// let components = TotalComponents {
///     amount: Decimal::from_str("100.00").unwrap(),
///     tax_amount: Some(Decimal::from_str("15.00").unwrap()),
///     discount_amount: None,
/// };
/// assert!(check_total(&components, Decimal::from_str("115.00").unwrap()).is_ok());
/// assert!(check_total(&components, Decimal::from_str("115.50").unwrap()).is_err());
/// ```
pub fn check_total(components: &TotalComponents, total: Decimal) -> Result<(), TotalViolation> {
    check_total_with_tolerance(components, total, TOTAL_TOLERANCE)
}

/// Checks a total against its components using an explicit tolerance.
///
/// The check passes when the absolute difference is strictly less than
/// `tolerance`.
pub fn check_total_with_tolerance(
    components: &TotalComponents,
    total: Decimal,
    tolerance: Decimal,
) -> Result<(), TotalViolation> {
    let expected = components.derive_total();
    let difference = total - expected;
    if difference.abs() < tolerance {
        Ok(())
    } else {
        Err(TotalViolation {
            expected,
            actual: total,
            difference,
        })
    }
}
