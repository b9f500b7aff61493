//! Generic financial transaction with a derived total.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calculation::{TotalComponents, check_total};
use crate::error::{EngineError, EngineResult};

/// A staff transaction with a derived total, such as the payroll deduction a
/// JSON export reports for each staff member.
///
/// # Example
///
/// ```
/// use billing_engine::models::Transaction;
/// use chrono::NaiveDate;
/// use rust_decimal::Decimal;
///
/// let txn = Transaction::new(
///     "staff-3",
///     "deposit",
///     Decimal::new(50000, 2),
///     Some(Decimal::new(2500, 2)),
///     None,
///     "Security deposit",
///     NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
/// )
/// .unwrap();
/// assert_eq!(txn.total_amount, Decimal::new(52500, 2));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier.
    pub id: Uuid,
    /// The staff member the transaction belongs to.
    pub staff_id: String,
    /// Free-form transaction kind.
    pub transaction_type: String,
    /// Base amount.
    pub amount: Decimal,
    /// Tax added on top.
    #[serde(default)]
    pub tax_amount: Option<Decimal>,
    /// Discount subtracted.
    #[serde(default)]
    pub discount_amount: Option<Decimal>,
    /// `amount + tax - discount`.
    pub total_amount: Decimal,
    /// Description.
    pub description: String,
    /// Transaction date.
    pub date: NaiveDate,
}

impl Transaction {
    /// Creates a transaction, deriving the total from its components.
    pub fn new(
        staff_id: impl Into<String>,
        transaction_type: impl Into<String>,
        amount: Decimal,
        tax_amount: Option<Decimal>,
        discount_amount: Option<Decimal>,
        description: impl Into<String>,
        date: NaiveDate,
    ) -> EngineResult<Self> {
        let components = TotalComponents {
            amount,
            tax_amount,
            discount_amount,
        };
        let transaction = Self {
            id: Uuid::new_v4(),
            staff_id: staff_id.into(),
            transaction_type: transaction_type.into(),
            amount,
            tax_amount,
            discount_amount,
            total_amount: components.derive_total(),
            description: description.into(),
            date,
        };
        transaction.validate()?;
        Ok(transaction)
    }

    /// Checks non-negative adjustments and the derived total.
    pub fn validate(&self) -> EngineResult<()> {
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
        let components = TotalComponents {
            amount: self.amount,
            tax_amount: self.tax_amount,
            discount_amount: self.discount_amount,
        };
        check_total(&components, self.total_amount)
            .map_err(|violation| EngineError::invalid_charge("total_amount", violation.to_string()))
    }
}
