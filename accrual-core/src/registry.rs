//! Order registry
//!
//! The only writer of new order rows. Ownership is decided by the storage
//! layer's insert-if-absent; this module classifies the result.

use crate::metrics::Metrics;
use crate::storage::{InsertOutcome, OrderStore};
use crate::types::{Order, OrderNumber, Registration};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct OrderRegistry {
    orders: Arc<dyn OrderStore>,
    metrics: Metrics,
}

impl OrderRegistry {
    pub fn new(orders: Arc<dyn OrderStore>, metrics: Metrics) -> Self {
        Self { orders, metrics }
    }

    /// Register `number` for `user_id`.
    ///
    /// Re-registering one's own order is a successful no-op
    /// (`AlreadyOwned`); a number held by someone else is `OrderConflict`.
    pub async fn register(&self, user_id: Uuid, number: &str) -> Result<Registration> {
        let number = match OrderNumber::parse(number) {
            Ok(number) => number,
            Err(e) => {
                self.metrics.record_registration("invalid");
                return Err(e);
            }
        };

        let outcome = match self.orders.insert_order(&number, user_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.record_registration("error");
                return Err(e);
            }
        };

        match outcome {
            InsertOutcome::Inserted(order) => {
                info!(order = %number, user_id = %user_id, "Order registered");
                self.metrics.record_registration("created");
                Ok(Registration::Created(order))
            }
            InsertOutcome::Existing(order) if order.user_id == user_id => {
                debug!(order = %number, user_id = %user_id, "Order already registered by caller");
                self.metrics.record_registration("already_owned");
                Ok(Registration::AlreadyOwned(order))
            }
            InsertOutcome::Existing(order) => {
                warn!(
                    order = %number,
                    user_id = %user_id,
                    owner = %order.user_id,
                    "Order registered by another user"
                );
                self.metrics.record_registration("conflict");
                Err(Error::OrderConflict(number.to_string()))
            }
        }
    }

    /// Orders of `user_id`, oldest first
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Order>> {
        self.orders.orders_for_user(user_id).await
    }
}
