//! Withdrawal admission (write side)
//!
//! The balance check and the insert happen inside one store call, so two
//! concurrent withdrawals of one user can never both spend the same funds.

use crate::metrics::Metrics;
use crate::storage::LedgerStore;
use crate::types::{Admission, OrderNumber, Withdrawal, WithdrawalRequest, MAX_AMOUNT};
use crate::{Error, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::Validation(format!(
            "withdrawal amount must be positive, got {}",
            amount
        )));
    }

    if amount.normalize().scale() > 2 {
        return Err(Error::Validation(format!(
            "withdrawal amount has more than two decimal places: {}",
            amount
        )));
    }

    if amount > MAX_AMOUNT {
        return Err(Error::Validation(format!(
            "withdrawal amount too large: {}",
            amount
        )));
    }

    Ok(())
}

pub struct WithdrawalAdmission {
    ledger: Arc<dyn LedgerStore>,
    metrics: Metrics,
}

impl WithdrawalAdmission {
    pub fn new(ledger: Arc<dyn LedgerStore>, metrics: Metrics) -> Self {
        Self { ledger, metrics }
    }

    /// Debit `amount` from `user_id`'s balance against `order_number`.
    pub async fn withdraw(
        &self,
        user_id: Uuid,
        order_number: &str,
        amount: Decimal,
    ) -> Result<Withdrawal> {
        let request = match self.validate(user_id, order_number, amount) {
            Ok(request) => request,
            Err(e) => {
                self.metrics.record_withdrawal("invalid");
                return Err(e);
            }
        };

        let admission = match self.ledger.admit_withdrawal(&request).await {
            Ok(admission) => admission,
            Err(e) => {
                self.metrics.record_withdrawal("error");
                return Err(e);
            }
        };

        match admission {
            Admission::Accepted(withdrawal) => {
                info!(
                    user_id = %user_id,
                    order = %withdrawal.order_number,
                    amount = %withdrawal.amount,
                    "Withdrawal accepted"
                );
                self.metrics.record_withdrawal("accepted");
                Ok(withdrawal)
            }
            Admission::InsufficientFunds(balance) => {
                warn!(
                    user_id = %user_id,
                    order = %request.order_number,
                    required = %amount,
                    available = %balance.current,
                    "Withdrawal rejected: insufficient funds"
                );
                self.metrics.record_withdrawal("insufficient_funds");
                Err(Error::InsufficientFunds {
                    required: amount,
                    available: balance.current,
                })
            }
        }
    }

    /// Withdrawals of `user_id`, oldest first
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Withdrawal>> {
        self.ledger.withdrawals_for_user(user_id).await
    }

    fn validate(
        &self,
        user_id: Uuid,
        order_number: &str,
        amount: Decimal,
    ) -> Result<WithdrawalRequest> {
        let order_number = OrderNumber::parse(order_number)?;
        validate_amount(amount)?;

        Ok(WithdrawalRequest {
            user_id,
            order_number,
            amount,
        })
    }
}
