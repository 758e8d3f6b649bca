//! In-memory store
//!
//! All state sits behind one mutex, which makes every trait method a single
//! critical section: inserts are race-free and balance reads are snapshots.

use super::{stored_accrual, InsertOutcome, LedgerStore, OrderStore};
use crate::types::{
    Admission, Balance, LedgerTotals, Order, OrderNumber, OrderStatus, Withdrawal,
    WithdrawalRequest,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Default)]
struct State {
    /// Insertion order doubles as "oldest first"
    orders: Vec<Order>,
    by_number: HashMap<String, usize>,
    withdrawals: Vec<Withdrawal>,
}

impl State {
    fn totals(&self, user_id: Uuid) -> LedgerTotals {
        let accrued = self
            .orders
            .iter()
            .filter(|o| o.user_id == user_id && o.status == OrderStatus::Processed)
            .filter_map(|o| o.accrual)
            .sum::<Decimal>();

        let withdrawn = self
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .map(|w| w.amount)
            .sum::<Decimal>();

        LedgerTotals { accrued, withdrawn }
    }
}

/// In-memory order and ledger store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the database were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    /// Number of stored orders
    pub fn order_count(&self) -> usize {
        self.state.lock().orders.len()
    }

    /// Number of stored withdrawals
    pub fn withdrawal_count(&self) -> usize {
        self.state.lock().withdrawals.len()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, number: &OrderNumber, user_id: Uuid) -> Result<InsertOutcome> {
        self.check_available()?;
        let mut state = self.state.lock();

        if let Some(&idx) = state.by_number.get(number.as_str()) {
            return Ok(InsertOutcome::Existing(state.orders[idx].clone()));
        }

        let now = Utc::now();
        let order = Order {
            number: number.clone(),
            user_id,
            status: OrderStatus::New,
            accrual: None,
            uploaded_at: now,
            updated_at: now,
        };
        let idx = state.orders.len();
        state.orders.push(order.clone());
        state.by_number.insert(number.as_str().to_string(), idx);

        Ok(InsertOutcome::Inserted(order))
    }

    async fn find_order(&self, number: &OrderNumber) -> Result<Option<Order>> {
        self.check_available()?;
        let state = self.state.lock();
        Ok(state
            .by_number
            .get(number.as_str())
            .map(|&idx| state.orders[idx].clone()))
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        self.check_available()?;
        let state = self.state.lock();
        Ok(state
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn pending_orders(&self) -> Result<Vec<Order>> {
        self.check_available()?;
        let state = self.state.lock();
        Ok(state
            .orders
            .iter()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn pending_orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        self.check_available()?;
        let state = self.state.lock();
        Ok(state
            .orders
            .iter()
            .filter(|o| o.user_id == user_id && !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn apply_accrual(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<bool> {
        self.check_available()?;
        let mut state = self.state.lock();

        let Some(&idx) = state.by_number.get(number.as_str()) else {
            return Ok(false);
        };

        let order = &mut state.orders[idx];
        if !order.status.can_transition_to(status) {
            return Ok(false);
        }

        order.status = status;
        order.accrual = stored_accrual(status, accrual);
        order.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn ledger_totals(&self, user_id: Uuid) -> Result<LedgerTotals> {
        self.check_available()?;
        Ok(self.state.lock().totals(user_id))
    }

    async fn admit_withdrawal(&self, request: &WithdrawalRequest) -> Result<Admission> {
        self.check_available()?;
        let mut state = self.state.lock();

        let balance = Balance::from_totals(state.totals(request.user_id));
        if !balance.covers(request.amount) {
            return Ok(Admission::InsufficientFunds(balance));
        }

        let withdrawal = Withdrawal {
            user_id: request.user_id,
            order_number: request.order_number.clone(),
            amount: request.amount,
            processed_at: Utc::now(),
        };
        state.withdrawals.push(withdrawal.clone());

        Ok(Admission::Accepted(withdrawal))
    }

    async fn withdrawals_for_user(&self, user_id: Uuid) -> Result<Vec<Withdrawal>> {
        self.check_available()?;
        let state = self.state.lock();
        Ok(state
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }
}
