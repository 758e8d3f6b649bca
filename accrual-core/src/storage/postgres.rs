//! PostgreSQL store (sqlx)
//!
//! Schema: `sql/schema.sql`. Every statement is parameterized.

use super::{stored_accrual, InsertOutcome, LedgerStore, OrderStore};
use crate::config::DatabaseConfig;
use crate::types::{
    Admission, Balance, LedgerTotals, Order, OrderNumber, OrderStatus, Withdrawal,
    WithdrawalRequest,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, PgExecutor};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const ORDER_COLUMNS: &str = "number, user_id, status, accrual, uploaded_at, updated_at";

#[derive(Debug, FromRow)]
struct OrderRow {
    number: String,
    user_id: Uuid,
    status: String,
    accrual: Option<Decimal>,
    uploaded_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = Error;

    fn try_from(row: OrderRow) -> Result<Self> {
        Ok(Order {
            number: stored_number(&row.number)?,
            user_id: row.user_id,
            status: row.status.parse()?,
            accrual: row.accrual,
            uploaded_at: row.uploaded_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct WithdrawalRow {
    user_id: Uuid,
    order_number: String,
    amount: Decimal,
    processed_at: DateTime<Utc>,
}

impl TryFrom<WithdrawalRow> for Withdrawal {
    type Error = Error;

    fn try_from(row: WithdrawalRow) -> Result<Self> {
        Ok(Withdrawal {
            user_id: row.user_id,
            order_number: stored_number(&row.order_number)?,
            amount: row.amount,
            processed_at: row.processed_at,
        })
    }
}

fn stored_number(raw: &str) -> Result<OrderNumber> {
    OrderNumber::parse(raw)
        .map_err(|_| Error::Internal(format!("stored order number fails Luhn check: {}", raw)))
}

fn status_names(statuses: &[OrderStatus]) -> Vec<&'static str> {
    statuses.iter().map(OrderStatus::as_str).collect()
}

/// Advisory lock key serializing withdrawals of one user.
///
/// Collisions between users only cost extra serialization.
fn user_lock_key(user_id: Uuid) -> i64 {
    let (hi, lo) = user_id.as_u64_pair();
    (hi ^ lo) as i64
}

async fn fetch_totals<'e, E>(executor: E, user_id: Uuid) -> Result<LedgerTotals>
where
    E: PgExecutor<'e>,
{
    // One statement, one snapshot: both sums see the same committed state.
    let (accrued, withdrawn) = sqlx::query_as::<_, (Decimal, Decimal)>(
        r#"
        SELECT
            (SELECT COALESCE(SUM(accrual), 0)
               FROM orders
              WHERE user_id = $1 AND status = $2) AS accrued,
            (SELECT COALESCE(SUM(amount), 0)
               FROM withdrawals
              WHERE user_id = $1) AS withdrawn
        "#,
    )
    .bind(user_id)
    .bind(OrderStatus::Processed.as_str())
    .fetch_one(executor)
    .await?;

    Ok(LedgerTotals { accrued, withdrawn })
}

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_orders(&self, sql: &str, user_id: Option<Uuid>) -> Result<Vec<Order>> {
        let mut query = sqlx::query_as::<_, OrderRow>(sql);
        if let Some(user_id) = user_id {
            query = query.bind(user_id);
        }
        query
            .bind(status_names(&OrderStatus::PENDING))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Order::try_from)
            .collect()
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(&self, number: &OrderNumber, user_id: Uuid) -> Result<InsertOutcome> {
        // The primary key on `number` arbitrates concurrent registrations.
        let inserted = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            INSERT INTO orders (number, user_id, status, uploaded_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            ON CONFLICT (number) DO NOTHING
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(number.as_str())
        .bind(user_id)
        .bind(OrderStatus::New.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(InsertOutcome::Inserted(row.try_into()?));
        }

        debug!(order = %number, "order number already taken");
        let existing = self.find_order(number).await?.ok_or_else(|| {
            Error::Internal(format!("order {} conflicted but cannot be read", number))
        })?;

        Ok(InsertOutcome::Existing(existing))
    }

    async fn find_order(&self, number: &OrderNumber) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE number = $1"
        ))
        .bind(number.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Order::try_from).transpose()
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE user_id = $1
            ORDER BY uploaded_at, number
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Order::try_from)
        .collect()
    }

    async fn pending_orders(&self) -> Result<Vec<Order>> {
        self.fetch_orders(
            &format!(
                r#"
                SELECT {ORDER_COLUMNS}
                FROM orders
                WHERE status = ANY($1)
                ORDER BY uploaded_at, number
                "#
            ),
            None,
        )
        .await
    }

    async fn pending_orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        self.fetch_orders(
            &format!(
                r#"
                SELECT {ORDER_COLUMNS}
                FROM orders
                WHERE user_id = $1 AND status = ANY($2)
                ORDER BY uploaded_at, number
                "#
            ),
            Some(user_id),
        )
        .await
    }

    async fn apply_accrual(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<bool> {
        let predecessors = status.predecessors();
        if predecessors.is_empty() {
            return Ok(false);
        }

        // Conditional write: terminal rows and backward moves never match.
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, accrual = $3, updated_at = NOW()
            WHERE number = $1 AND status = ANY($4)
            "#,
        )
        .bind(number.as_str())
        .bind(status.as_str())
        .bind(stored_accrual(status, accrual))
        .bind(status_names(predecessors))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn ledger_totals(&self, user_id: Uuid) -> Result<LedgerTotals> {
        fetch_totals(&self.pool, user_id).await
    }

    async fn admit_withdrawal(&self, request: &WithdrawalRequest) -> Result<Admission> {
        let mut tx = self.pool.begin().await?;

        // Serializes check-then-insert per user until commit/rollback.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(user_lock_key(request.user_id))
            .execute(&mut *tx)
            .await?;

        let balance = Balance::from_totals(fetch_totals(&mut *tx, request.user_id).await?);
        if !balance.covers(request.amount) {
            tx.rollback().await?;
            return Ok(Admission::InsufficientFunds(balance));
        }

        let row = sqlx::query_as::<_, WithdrawalRow>(
            r#"
            INSERT INTO withdrawals (user_id, order_number, amount, processed_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING user_id, order_number, amount, processed_at
            "#,
        )
        .bind(request.user_id)
        .bind(request.order_number.as_str())
        .bind(request.amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Admission::Accepted(row.try_into()?))
    }

    async fn withdrawals_for_user(&self, user_id: Uuid) -> Result<Vec<Withdrawal>> {
        sqlx::query_as::<_, WithdrawalRow>(
            r#"
            SELECT user_id, order_number, amount, processed_at
            FROM withdrawals
            WHERE user_id = $1
            ORDER BY processed_at, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Withdrawal::try_from)
        .collect()
    }
}
