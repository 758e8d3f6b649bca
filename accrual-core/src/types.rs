//! Core domain types
//!
//! Money is always `Decimal`; the storage layer keeps it as `NUMERIC(14,2)`.

use crate::{luhn, Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Largest amount a `NUMERIC(14,2)` column holds
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0x107A_3FFF, 0x5AF3, 0, false, 2);

/// Luhn-valid order number
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Parse raw client input. Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if luhn::is_valid(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(Error::InvalidOrderNumber(trimmed.to_string()))
        }
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OrderNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OrderNumber {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<OrderNumber> for String {
    fn from(number: OrderNumber) -> Self {
        number.0
    }
}

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Registered locally, not yet picked up by the provider
    New,
    /// Provider is calculating the reward
    Processing,
    /// Provider rejected the order (terminal)
    Invalid,
    /// Reward confirmed (terminal)
    Processed,
}

impl OrderStatus {
    /// Statuses the reconciler looks at
    pub const PENDING: [OrderStatus; 2] = [OrderStatus::New, OrderStatus::Processing];

    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }

    /// Statuses from which an order may move to `self`.
    ///
    /// Empty for `New`: nothing ever moves back to it.
    pub fn predecessors(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::New => &[],
            OrderStatus::Processing => &[OrderStatus::New],
            OrderStatus::Invalid | OrderStatus::Processed => {
                &[OrderStatus::New, OrderStatus::Processing]
            }
        }
    }

    /// Whether `self -> next` is a forward transition
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            other => Err(Error::Internal(format!("unknown order status: {}", other))),
        }
    }
}

/// Status vocabulary of the accrual provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl From<ProviderStatus> for OrderStatus {
    fn from(status: ProviderStatus) -> Self {
        match status {
            ProviderStatus::Registered => OrderStatus::New,
            ProviderStatus::Processing => OrderStatus::Processing,
            ProviderStatus::Invalid => OrderStatus::Invalid,
            ProviderStatus::Processed => OrderStatus::Processed,
        }
    }
}

/// Provider's view of a single order
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualReport {
    pub order: String,
    pub status: ProviderStatus,
    pub accrual: Option<Decimal>,
}

/// Registered order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub number: OrderNumber,
    pub user_id: Uuid,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Successful outcome of an order registration
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    /// New row inserted with status NEW
    Created(Order),
    /// The caller had already registered this number; nothing changed
    AlreadyOwned(Order),
}

impl Registration {
    /// The stored order
    pub fn order(&self) -> &Order {
        match self {
            Registration::Created(order) | Registration::AlreadyOwned(order) => order,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Registration::Created(_))
    }
}

/// Registered debit against a user's balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub user_id: Uuid,
    pub order_number: OrderNumber,
    pub amount: Decimal,
    pub processed_at: DateTime<Utc>,
}

/// Raw aggregates read from one storage snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerTotals {
    /// Sum of accruals of PROCESSED orders
    pub accrued: Decimal,
    /// Sum of all withdrawals
    pub withdrawn: Decimal,
}

/// Derived user balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    /// Spendable funds
    pub current: Decimal,
    /// Cumulative amount already withdrawn
    pub withdrawn: Decimal,
}

impl Balance {
    pub fn from_totals(totals: LedgerTotals) -> Self {
        Self {
            current: totals.accrued - totals.withdrawn,
            withdrawn: totals.withdrawn,
        }
    }

    /// Whether `amount` can be withdrawn
    pub fn covers(&self, amount: Decimal) -> bool {
        amount <= self.current
    }
}

impl From<LedgerTotals> for Balance {
    fn from(totals: LedgerTotals) -> Self {
        Balance::from_totals(totals)
    }
}

/// Withdrawal request after validation
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalRequest {
    pub user_id: Uuid,
    pub order_number: OrderNumber,
    pub amount: Decimal,
}

/// Result of an atomic check-then-insert
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Accepted(Withdrawal),
    /// Balance observed inside the critical section
    InsufficientFunds(Balance),
}
