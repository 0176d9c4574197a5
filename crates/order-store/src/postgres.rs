use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ChannelId, OrderId, OrganizationId};
use domain::{IdempotencyKey, LineItem, Money, Order, OrderStatus, Sku};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreConfig, StoreError,
    store::{CompletionHook, CompletionHooks, OrderStore, OrderTransaction, TxOutcome},
};

/// SQLSTATE raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Name of the unique constraint on the idempotency triple.
const IDEMPOTENCY_CONSTRAINT: &str = "orders_idempotency_key";

const ORDER_COLUMNS: &str = r#"
    id, organization_id, channel_id, external_id, status, total_amount_cents, currency,
    customer_email, customer_name, shipping_address, billing_address, metadata,
    inventory_reserved, cancellation_reason, cancelled_at, created_at, updated_at
"#;

/// PostgreSQL-backed order store.
///
/// Idempotency locks are `pg_advisory_xact_lock` on the 32-bit key hash;
/// row locks are `SELECT ... FOR UPDATE`. Both are released by PostgreSQL at
/// commit or rollback.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
    config: StoreConfig,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool, config: StoreConfig) -> Self {
        Self { pool, config }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        let mut tx = self.pool.begin().await?;

        // SET cannot take bind parameters; the value is an integer we format.
        let timeout_ms = self.config.lock_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL lock_timeout = '{timeout_ms}ms'"))
            .execute(&mut *tx)
            .await?;

        Ok(PostgresTransaction {
            tx,
            hooks: CompletionHooks::default(),
        })
    }
}

/// Transaction over a [`PostgresOrderStore`].
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
    hooks: CompletionHooks,
}

fn is_lock_timeout(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE))
}

fn row_to_order(row: &PgRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    let status: OrderStatus = status
        .parse()
        .map_err(|e: domain::OrderError| StoreError::Decode(e.to_string()))?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        organization_id: OrganizationId::new(row.try_get::<String, _>("organization_id")?),
        channel_id: ChannelId::new(row.try_get::<String, _>("channel_id")?),
        external_id: row.try_get("external_id")?,
        status,
        total_amount: Money::from_cents(row.try_get("total_amount_cents")?),
        currency: row.try_get("currency")?,
        customer_email: row.try_get("customer_email")?,
        customer_name: row.try_get("customer_name")?,
        shipping_address: row.try_get("shipping_address")?,
        billing_address: row.try_get("billing_address")?,
        metadata: row.try_get("metadata")?,
        inventory_reserved: row.try_get("inventory_reserved")?,
        cancellation_reason: row.try_get("cancellation_reason")?,
        cancelled_at: row.try_get::<Option<DateTime<Utc>>, _>("cancelled_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        line_items: Vec::new(),
    })
}

fn row_to_line_item(row: &PgRow) -> Result<LineItem> {
    Ok(LineItem {
        sku: Sku::new(row.try_get::<String, _>("sku")?),
        quantity: row.try_get("quantity")?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        name: row.try_get("name")?,
        variant_id: row.try_get("variant_id")?,
    })
}

impl PostgresTransaction {
    async fn load_line_items(&mut self, order: &mut Order) -> Result<()> {
        let rows = sqlx::query(
            r#"
            SELECT sku, quantity, unit_price_cents, name, variant_id
            FROM order_line_items
            WHERE order_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(order.id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;

        order.line_items = rows.iter().map(row_to_line_item).collect::<Result<_>>()?;
        Ok(())
    }

    async fn fetch_by_id(
        &mut self,
        organization_id: &OrganizationId,
        order_id: OrderId,
        for_update: bool,
    ) -> Result<Option<Order>> {
        let lock_clause = if for_update { "FOR UPDATE" } else { "" };
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND organization_id = $2 {lock_clause}"
        );

        let row = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .bind(organization_id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| {
                if is_lock_timeout(&e) {
                    StoreError::LockTimeout {
                        key: order_id.to_string(),
                    }
                } else {
                    StoreError::Database(e)
                }
            })?;

        match row {
            Some(row) => {
                let mut order = row_to_order(&row)?;
                self.load_line_items(&mut order).await?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl OrderTransaction for PostgresTransaction {
    #[tracing::instrument(skip(self, key), fields(key = %key, lock_id = key.lock_id()))]
    async fn acquire_lock(&mut self, key: &IdempotencyKey) -> Result<()> {
        let started = std::time::Instant::now();

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(i64::from(key.lock_id()))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                if is_lock_timeout(&e) {
                    metrics::counter!("order_store_lock_timeouts_total").increment(1);
                    StoreError::LockTimeout {
                        key: key.to_string(),
                    }
                } else {
                    StoreError::Database(e)
                }
            })?;

        metrics::histogram!("order_store_lock_wait_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(())
    }

    async fn find_by_external_id(
        &mut self,
        organization_id: &OrganizationId,
        channel_id: &ChannelId,
        external_id: &str,
    ) -> Result<Option<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE organization_id = $1 AND channel_id = $2 AND external_id = $3"
        );

        let row = sqlx::query(&sql)
            .bind(organization_id.as_str())
            .bind(channel_id.as_str())
            .bind(external_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        match row {
            Some(row) => {
                let mut order = row_to_order(&row)?;
                self.load_line_items(&mut order).await?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    async fn find_by_id(
        &mut self,
        organization_id: &OrganizationId,
        order_id: OrderId,
    ) -> Result<Option<Order>> {
        self.fetch_by_id(organization_id, order_id, false).await
    }

    async fn find_for_update(
        &mut self,
        organization_id: &OrganizationId,
        order_id: OrderId,
    ) -> Result<Option<Order>> {
        self.fetch_by_id(organization_id, order_id, true).await
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, organization_id, channel_id, external_id, status, total_amount_cents, currency,
                customer_email, customer_name, shipping_address, billing_address, metadata,
                inventory_reserved, cancellation_reason, cancelled_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.organization_id.as_str())
        .bind(order.channel_id.as_str())
        .bind(&order.external_id)
        .bind(order.status.as_str())
        .bind(order.total_amount.cents())
        .bind(&order.currency)
        .bind(&order.customer_email)
        .bind(&order.customer_name)
        .bind(&order.shipping_address)
        .bind(&order.billing_address)
        .bind(&order.metadata)
        .bind(order.inventory_reserved)
        .bind(&order.cancellation_reason)
        .bind(order.cancelled_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some(IDEMPOTENCY_CONSTRAINT)
            {
                return StoreError::DuplicateOrder {
                    organization_id: order.organization_id.clone(),
                    idempotency_key: order.idempotency_key().to_string(),
                };
            }
            StoreError::Database(e)
        })?;

        self.insert_line_items(order.id, &order.line_items).await
    }

    async fn update_order(&mut self, order: &Order) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                status = $3,
                total_amount_cents = $4,
                currency = $5,
                customer_email = $6,
                customer_name = $7,
                shipping_address = $8,
                billing_address = $9,
                metadata = $10,
                inventory_reserved = $11,
                cancellation_reason = $12,
                cancelled_at = $13,
                updated_at = $14
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.organization_id.as_str())
        .bind(order.status.as_str())
        .bind(order.total_amount.cents())
        .bind(&order.currency)
        .bind(&order.customer_email)
        .bind(&order.customer_name)
        .bind(&order.shipping_address)
        .bind(&order.billing_address)
        .bind(&order.metadata)
        .bind(order.inventory_reserved)
        .bind(&order.cancellation_reason)
        .bind(order.cancelled_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order.id));
        }
        Ok(())
    }

    async fn delete_line_items(&mut self, order_id: OrderId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM order_line_items WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_line_items(&mut self, order_id: OrderId, items: &[LineItem]) -> Result<()> {
        let offset: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM order_line_items WHERE order_id = $1",
        )
        .bind(order_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await?;

        for (index, item) in items.iter().enumerate() {
            let position = offset + i32::try_from(index).unwrap_or(i32::MAX);
            sqlx::query(
                r#"
                INSERT INTO order_line_items (order_id, position, sku, quantity, unit_price_cents, name, variant_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(order_id.as_uuid())
            .bind(position)
            .bind(item.sku.as_str())
            .bind(item.quantity)
            .bind(item.unit_price.cents())
            .bind(&item.name)
            .bind(&item.variant_id)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    fn on_complete(&mut self, hook: CompletionHook) {
        self.hooks.push(hook);
    }

    async fn commit(mut self) -> Result<()> {
        self.tx.commit().await?;
        self.hooks.finish(TxOutcome::Committed);
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        let result = self.tx.rollback().await;
        self.hooks.finish(TxOutcome::RolledBack);
        result?;
        Ok(())
    }
}
