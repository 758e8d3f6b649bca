//! Balance ledger (read side)

use crate::storage::LedgerStore;
use crate::types::Balance;
use crate::Result;
use std::sync::Arc;
use uuid::Uuid;

pub struct BalanceLedger {
    ledger: Arc<dyn LedgerStore>,
}

impl BalanceLedger {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Current and withdrawn amounts, derived from one storage snapshot
    pub async fn balance(&self, user_id: Uuid) -> Result<Balance> {
        let totals = self.ledger.ledger_totals(user_id).await?;
        Ok(Balance::from_totals(totals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, OrderStore};
    use crate::types::{OrderNumber, OrderStatus};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_new_user_has_zero_balance() {
        let ledger = BalanceLedger::new(Arc::new(MemoryStore::new()));
        let balance = ledger.balance(Uuid::new_v4()).await.unwrap();
        assert_eq!(balance.current, Decimal::ZERO);
        assert_eq!(balance.withdrawn, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_only_processed_orders_count() {
        let store = Arc::new(MemoryStore::new());
        let ledger = BalanceLedger::new(store.clone());
        let user = Uuid::new_v4();

        let processed = OrderNumber::parse("12345678903").unwrap();
        let processing = OrderNumber::parse("79927398713").unwrap();
        let other_user = OrderNumber::parse("2377225624").unwrap();
        store.insert_order(&processed, user).await.unwrap();
        store.insert_order(&processing, user).await.unwrap();
        store.insert_order(&other_user, Uuid::new_v4()).await.unwrap();

        store
            .apply_accrual(&processed, OrderStatus::Processed, Some(dec!(500.50)))
            .await
            .unwrap();
        store
            .apply_accrual(&processing, OrderStatus::Processing, Some(dec!(99)))
            .await
            .unwrap();
        store
            .apply_accrual(&other_user, OrderStatus::Processed, Some(dec!(10)))
            .await
            .unwrap();

        let balance = ledger.balance(user).await.unwrap();
        assert_eq!(balance.current, dec!(500.50));
        assert_eq!(balance.withdrawn, Decimal::ZERO);
    }
}
