//! Service facade
//!
//! The operations an HTTP layer calls once it has authenticated the user.

use crate::balance::BalanceLedger;
use crate::metrics::Metrics;
use crate::poller::ReconcileQueue;
use crate::registry::OrderRegistry;
use crate::storage::{LedgerStore, OrderStore};
use crate::types::{Balance, Order, Registration, Withdrawal};
use crate::withdrawal::WithdrawalAdmission;
use crate::Result;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub struct AccrualService {
    orders: Arc<dyn OrderStore>,
    registry: OrderRegistry,
    ledger: BalanceLedger,
    admission: WithdrawalAdmission,
    refresh: Option<ReconcileQueue>,
}

impl AccrualService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        ledger: Arc<dyn LedgerStore>,
        metrics: Metrics,
    ) -> Self {
        Self {
            registry: OrderRegistry::new(orders.clone(), metrics.clone()),
            ledger: BalanceLedger::new(ledger.clone()),
            admission: WithdrawalAdmission::new(ledger, metrics),
            orders,
            refresh: None,
        }
    }

    /// Build on a store that implements both traits
    pub fn from_store<S>(store: Arc<S>, metrics: Metrics) -> Self
    where
        S: OrderStore + LedgerStore + 'static,
    {
        Self::new(store.clone(), store, metrics)
    }

    /// Route `refresh_orders` into a running poller's worker pool
    pub fn with_refresh_queue(mut self, queue: ReconcileQueue) -> Self {
        self.refresh = Some(queue);
        self
    }

    pub async fn register_order(&self, user_id: Uuid, number: &str) -> Result<Registration> {
        self.registry.register(user_id, number).await
    }

    pub async fn list_orders(&self, user_id: Uuid) -> Result<Vec<Order>> {
        self.registry.list(user_id).await
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<Balance> {
        self.ledger.balance(user_id).await
    }

    pub async fn withdraw(
        &self,
        user_id: Uuid,
        order_number: &str,
        amount: Decimal,
    ) -> Result<Withdrawal> {
        self.admission.withdraw(user_id, order_number, amount).await
    }

    pub async fn list_withdrawals(&self, user_id: Uuid) -> Result<Vec<Withdrawal>> {
        self.admission.list(user_id).await
    }

    /// Queue the user's pending orders for reconciliation without waiting.
    ///
    /// Returns how many were queued. Orders already in flight, or that do not
    /// fit in the queue, are left to the next scheduled tick.
    pub async fn refresh_orders(&self, user_id: Uuid) -> Result<usize> {
        let Some(queue) = &self.refresh else {
            return Ok(0);
        };

        let pending = self.orders.pending_orders_for_user(user_id).await?;
        let total = pending.len();
        let queued = pending
            .into_iter()
            .filter(|order| queue.submit(order.number.clone()))
            .count();

        if total > 0 {
            debug!(user_id = %user_id, queued, total, "Refresh requested");
        }
        Ok(queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollerConfig;
    use crate::poller::{AccrualPoller, Reconciler};
    use crate::provider::AccrualProvider;
    use crate::storage::MemoryStore;
    use crate::types::{AccrualReport, OrderNumber, OrderStatus, ProviderStatus};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct AlwaysProcessed;

    #[async_trait]
    impl AccrualProvider for AlwaysProcessed {
        async fn fetch_accrual(&self, number: &OrderNumber) -> Result<Option<AccrualReport>> {
            Ok(Some(AccrualReport {
                order: number.to_string(),
                status: ProviderStatus::Processed,
                accrual: Some(dec!(7.77)),
            }))
        }
    }

    #[tokio::test]
    async fn test_refresh_without_poller_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let service = AccrualService::from_store(store, Metrics::new().unwrap());
        let user = Uuid::new_v4();

        service.register_order(user, "12345678903").await.unwrap();
        assert_eq!(service.refresh_orders(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refresh_feeds_worker_pool() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Metrics::new().unwrap();
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            Arc::new(AlwaysProcessed),
            metrics.clone(),
        ));
        let poller = AccrualPoller::start(
            store.clone(),
            reconciler,
            metrics.clone(),
            PollerConfig::default(),
        );
        let service =
            AccrualService::from_store(store.clone(), metrics).with_refresh_queue(poller.queue());
        let user = Uuid::new_v4();

        service.register_order(user, "12345678903").await.unwrap();
        service.register_order(user, "79927398713").await.unwrap();
        assert_eq!(service.refresh_orders(user).await.unwrap(), 2);

        poller.shutdown(Some(Duration::from_secs(1))).await;

        let orders = service.list_orders(user).await.unwrap();
        assert!(orders.iter().all(|o| o.status == OrderStatus::Processed));
        assert_eq!(service.balance(user).await.unwrap().current, dec!(15.54));
        assert_eq!(service.refresh_orders(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_withdrawals_round_trip_through_facade() {
        let store = Arc::new(MemoryStore::new());
        let service = AccrualService::from_store(store.clone(), Metrics::new().unwrap());
        let user = Uuid::new_v4();

        service.register_order(user, "12345678903").await.unwrap();
        let number = OrderNumber::parse("12345678903").unwrap();
        store
            .apply_accrual(&number, OrderStatus::Processed, Some(dec!(20)))
            .await
            .unwrap();

        service.withdraw(user, "2377225624", dec!(5)).await.unwrap();
        let balance = service.balance(user).await.unwrap();
        assert_eq!(balance.current, dec!(15));
        assert_eq!(balance.withdrawn, dec!(5));
        assert_eq!(service.list_withdrawals(user).await.unwrap().len(), 1);
    }
}
