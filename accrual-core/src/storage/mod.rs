//! Storage boundary
//!
//! The reconciliation core only talks to persistence through these traits.
//!
//! Implementations:
//! - `PostgresStore`: sqlx / PostgreSQL, used in production
//! - `MemoryStore`: in-process store for tests and local runs

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::types::{
    Admission, LedgerTotals, Order, OrderNumber, OrderStatus, Withdrawal, WithdrawalRequest,
};
use crate::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Outcome of an insert-if-absent on the order number
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// Row created by this call
    Inserted(Order),
    /// Number already taken; the stored row is returned untouched
    Existing(Order),
}

/// Order persistence
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a NEW order unless the number exists.
    ///
    /// Must be atomic with respect to concurrent inserts of the same number:
    /// exactly one caller observes `Inserted`.
    async fn insert_order(&self, number: &OrderNumber, user_id: Uuid) -> Result<InsertOutcome>;

    async fn find_order(&self, number: &OrderNumber) -> Result<Option<Order>>;

    /// Orders of one user, oldest first
    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>>;

    /// NEW and PROCESSING orders of all users, oldest first
    async fn pending_orders(&self) -> Result<Vec<Order>>;

    /// NEW and PROCESSING orders of one user, oldest first
    async fn pending_orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>>;

    /// Conditionally move an order to `status`.
    ///
    /// Applies only while the stored status is one of `status.predecessors()`;
    /// returns whether a row changed. `accrual` is stored only for PROCESSED.
    async fn apply_accrual(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<bool>;
}

/// Balance and withdrawal persistence
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Both aggregates from a single consistent snapshot
    async fn ledger_totals(&self, user_id: Uuid) -> Result<LedgerTotals>;

    /// Check the balance and insert the withdrawal as one atomic step per user
    async fn admit_withdrawal(&self, request: &WithdrawalRequest) -> Result<Admission>;

    /// Withdrawals of one user, oldest first
    async fn withdrawals_for_user(&self, user_id: Uuid) -> Result<Vec<Withdrawal>>;
}

/// Accrual value to persist for a target status
pub(crate) fn stored_accrual(status: OrderStatus, accrual: Option<Decimal>) -> Option<Decimal> {
    match status {
        OrderStatus::Processed => Some(accrual.unwrap_or(Decimal::ZERO)),
        _ => None,
    }
}
