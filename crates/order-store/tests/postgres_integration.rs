//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency and need a
//! running Docker daemon. Run with:
//!
//! ```bash
//! cargo test -p order-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{ChannelId, OrderId, OrganizationId};
use domain::{IdempotencyKey, LineItem, Money, Order, OrderStatus};
use order_store::{OrderStore, OrderTransaction, PostgresOrderStore, StoreConfig, StoreError};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_orders_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store(lock_timeout: Duration) -> PostgresOrderStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE order_line_items, orders")
        .execute(&pool)
        .await
        .unwrap();

    PostgresOrderStore::new(pool, StoreConfig::with_lock_timeout(lock_timeout))
}

fn test_order(org: &str, external_id: &str) -> Order {
    let now = Utc::now();
    Order {
        id: OrderId::new(),
        organization_id: OrganizationId::new(org),
        channel_id: ChannelId::new("shopify"),
        external_id: external_id.to_string(),
        status: OrderStatus::Pending,
        total_amount: Money::from_cents(4500),
        currency: "USD".to_string(),
        customer_email: Some("ada@example.com".to_string()),
        customer_name: Some("Ada".to_string()),
        shipping_address: Some(serde_json::json!({"city": "London"})),
        billing_address: None,
        metadata: serde_json::json!({"source": "test"}),
        inventory_reserved: true,
        cancellation_reason: None,
        cancelled_at: None,
        created_at: now,
        updated_at: now,
        line_items: vec![
            LineItem::new("A", "Widget", 2, Money::from_cents(1000)),
            LineItem::new("B", "Gadget", 1, Money::from_cents(2500)).with_variant("v-1"),
        ],
    }
}

#[tokio::test]
async fn insert_and_find_by_external_id() {
    let store = get_test_store(Duration::from_secs(5)).await;
    let order = test_order("org-A", "1001");

    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&order).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let found = tx
        .find_by_external_id(&order.organization_id, &order.channel_id, "1001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, order.id);
    assert_eq!(found.status, OrderStatus::Pending);
    assert_eq!(found.line_items.len(), 2);
    assert_eq!(found.line_items[0].sku.as_str(), "A");
    assert_eq!(found.line_items[1].variant_id.as_deref(), Some("v-1"));
    assert_eq!(found.shipping_address, order.shipping_address);

    // Other tenants never see it.
    let other = tx
        .find_by_external_id(&OrganizationId::new("org-B"), &order.channel_id, "1001")
        .await
        .unwrap();
    assert!(other.is_none());
}

#[tokio::test]
async fn duplicate_triple_is_rejected() {
    let store = get_test_store(Duration::from_secs(5)).await;

    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&test_order("org-A", "1001")).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let err = tx
        .insert_order(&test_order("org-A", "1001"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateOrder { .. }));
}

#[tokio::test]
async fn rollback_discards_insert() {
    let store = get_test_store(Duration::from_secs(5)).await;
    let order = test_order("org-A", "1001");

    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&order).await.unwrap();
    tx.rollback().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    assert!(
        tx.find_by_id(&order.organization_id, order.id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn update_and_replace_line_items() {
    let store = get_test_store(Duration::from_secs(5)).await;
    let mut order = test_order("org-A", "1001");

    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&order).await.unwrap();
    tx.commit().await.unwrap();

    order.status = OrderStatus::Confirmed;
    order.total_amount = Money::from_cents(5000);

    let mut tx = store.begin().await.unwrap();
    tx.update_order(&order).await.unwrap();
    assert_eq!(tx.delete_line_items(order.id).await.unwrap(), 2);
    tx.insert_line_items(
        order.id,
        &[LineItem::new("A", "Widget", 5, Money::from_cents(1000))],
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let stored = tx
        .find_by_id(&order.organization_id, order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, OrderStatus::Confirmed);
    assert_eq!(stored.total_amount.cents(), 5000);
    assert_eq!(stored.line_items.len(), 1);
    assert_eq!(stored.line_items[0].quantity, 5);
}

#[tokio::test]
async fn update_in_wrong_organization_is_not_found() {
    let store = get_test_store(Duration::from_secs(5)).await;
    let order = test_order("org-A", "1001");

    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&order).await.unwrap();
    tx.commit().await.unwrap();

    let mut foreign = order.clone();
    foreign.organization_id = OrganizationId::new("org-B");

    let mut tx = store.begin().await.unwrap();
    let err = tx.update_order(&foreign).await.unwrap_err();
    assert!(matches!(err, StoreError::OrderNotFound(_)));
}

#[tokio::test]
async fn advisory_lock_times_out_while_held() {
    let store = get_test_store(Duration::from_millis(200)).await;
    let key = IdempotencyKey::new(&ChannelId::new("shopify"), "1001");

    let mut holder = store.begin().await.unwrap();
    holder.acquire_lock(&key).await.unwrap();

    let mut waiter = store.begin().await.unwrap();
    let err = waiter.acquire_lock(&key).await.unwrap_err();
    assert!(matches!(err, StoreError::LockTimeout { .. }));
    drop(waiter);

    holder.commit().await.unwrap();

    let mut next = store.begin().await.unwrap();
    next.acquire_lock(&key).await.unwrap();
}
