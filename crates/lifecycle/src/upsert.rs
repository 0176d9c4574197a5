//! Idempotent order upsert with exactly-once inventory reservation.

use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{ChannelId, OrderId, OrganizationId};
use domain::{
    IdempotencyKey, LineItem, Money, Order, OrderStateMachine, OrderStatus, line_items_differ,
};
use order_store::{OrderStore, OrderTransaction};
use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};
use crate::services::inventory::{InventoryLine, InventoryService, ReserveRequest};

/// One inbound order event, already mapped from the channel's payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpsertInput {
    pub organization_id: OrganizationId,
    pub channel_id: ChannelId,
    pub external_id: String,
    #[serde(default)]
    pub status: OrderStatus,
    pub total_amount: Money,
    pub currency: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub shipping_address: Option<serde_json::Value>,
    #[serde(default)]
    pub billing_address: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    pub line_items: Vec<LineItem>,
}

impl OrderUpsertInput {
    /// Structural checks. Nothing has been touched when this fails.
    pub fn validate(&self) -> Result<()> {
        if self.organization_id.is_blank() {
            return Err(LifecycleError::Validation(
                "organization_id is required".to_string(),
            ));
        }
        if self.channel_id.is_blank() {
            return Err(LifecycleError::Validation(
                "channel_id is required".to_string(),
            ));
        }
        if self.external_id.trim().is_empty() {
            return Err(LifecycleError::Validation(
                "external_id is required".to_string(),
            ));
        }
        if self.line_items.is_empty() {
            return Err(LifecycleError::Validation(
                "at least one line item is required".to_string(),
            ));
        }
        for (index, item) in self.line_items.iter().enumerate() {
            if item.sku.as_str().trim().is_empty() {
                return Err(LifecycleError::Validation(format!(
                    "line item {index}: sku is required"
                )));
            }
            if item.quantity <= 0 {
                return Err(LifecycleError::Validation(format!(
                    "line item {index} ({}): quantity must be greater than 0, got {}",
                    item.sku, item.quantity
                )));
            }
        }
        if self.total_amount.is_negative() {
            return Err(LifecycleError::Validation(format!(
                "total_amount must not be negative, got {}",
                self.total_amount
            )));
        }
        // Cancellation releases stock; only the cancellation service does that.
        if self.status == OrderStatus::Cancelled {
            return Err(LifecycleError::Validation(
                "an upsert cannot cancel an order; use the cancellation operation".to_string(),
            ));
        }
        Ok(())
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::new(&self.channel_id, &self.external_id)
    }

    fn into_order(self, id: OrderId, now: DateTime<Utc>) -> Order {
        Order {
            id,
            organization_id: self.organization_id,
            channel_id: self.channel_id,
            external_id: self.external_id,
            status: self.status,
            total_amount: self.total_amount,
            currency: self.currency,
            customer_email: self.customer_email,
            customer_name: self.customer_name,
            shipping_address: self.shipping_address,
            billing_address: self.billing_address,
            metadata: self.metadata.unwrap_or_else(|| serde_json::json!({})),
            inventory_reserved: false,
            cancellation_reason: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            line_items: self.line_items,
        }
    }
}

/// What an upsert did.
#[derive(Debug, Clone)]
pub struct OrderUpsertResult {
    pub order: Order,
    pub created: bool,
    pub updated: bool,
    pub inventory_reserved: bool,
    pub line_items_changed: bool,
}

impl OrderUpsertResult {
    fn outcome(&self) -> &'static str {
        match (self.created, self.updated) {
            (true, _) => "created",
            (false, true) => "updated",
            (false, false) => "unchanged",
        }
    }
}

/// Records order events so that concurrent and repeated deliveries for the
/// same `(organization, channel, external id)` resolve to one order, and
/// stock is reserved exactly once for it.
pub struct OrderUpsertService<S, I>
where
    S: OrderStore,
    I: InventoryService<S::Tx>,
{
    store: S,
    inventory: I,
}

impl<S, I> OrderUpsertService<S, I>
where
    S: OrderStore,
    I: InventoryService<S::Tx>,
{
    pub fn new(store: S, inventory: I) -> Self {
        Self { store, inventory }
    }

    /// Creates the order, updates it, or does nothing if it is unchanged.
    ///
    /// The whole check-then-act sequence runs inside one transaction holding
    /// the idempotency lock. Any error rolls everything back, including a
    /// reservation made through the transaction.
    #[tracing::instrument(
        skip(self, input),
        fields(
            organization_id = %input.organization_id,
            channel_id = %input.channel_id,
            external_id = %input.external_id,
        )
    )]
    pub async fn upsert_order(&self, input: OrderUpsertInput) -> Result<OrderUpsertResult> {
        let start = Instant::now();
        input.validate()?;

        let result = self.upsert_locked(input).await;

        metrics::histogram!("order_upsert_duration_seconds").record(start.elapsed().as_secs_f64());
        match &result {
            Ok(upserted) => {
                metrics::counter!("order_upserts_total", "outcome" => upserted.outcome())
                    .increment(1);
            }
            Err(err) => {
                metrics::counter!("order_upsert_failures_total").increment(1);
                tracing::warn!(error = %err, "order upsert failed");
            }
        }
        result
    }

    async fn upsert_locked(&self, input: OrderUpsertInput) -> Result<OrderUpsertResult> {
        let key = input.idempotency_key();
        let mut tx = self.store.begin().await?;
        tx.acquire_lock(&key).await?;
        tracing::debug!(%key, lock_id = key.lock_id(), "idempotency lock acquired");

        let found = tx
            .find_by_external_id(
                &input.organization_id,
                &input.channel_id,
                &input.external_id,
            )
            .await?;
        // Cancellation and status changes lock the row, not the key; take the
        // row lock too and re-read so an update never overwrites their result.
        let existing = match found {
            Some(order) => {
                tx.find_for_update(&input.organization_id, order.id)
                    .await?
            }
            None => None,
        };

        let result = match existing {
            None => self.create(&mut tx, &key, input).await?,
            Some(order) => Self::update(&mut tx, order, input).await?,
        };

        tx.commit().await?;
        Ok(result)
    }

    async fn create(
        &self,
        tx: &mut S::Tx,
        key: &IdempotencyKey,
        input: OrderUpsertInput,
    ) -> Result<OrderUpsertResult> {
        let order_id = OrderId::new();
        let request = ReserveRequest {
            organization_id: input.organization_id.clone(),
            order_id,
            line_items: input.line_items.iter().map(InventoryLine::from).collect(),
        };

        // Reserve before the row exists so a rejection leaves nothing behind.
        let outcome = self.inventory.reserve_for_order(tx, request).await?;
        if !outcome.success {
            metrics::counter!("inventory_reservations_rejected_total").increment(1);
            tracing::warn!(%key, shortfalls = outcome.shortfalls.len(), "inventory reservation rejected");
            return Err(LifecycleError::InsufficientStock {
                idempotency_key: key.to_string(),
                shortfalls: outcome.shortfalls,
            });
        }

        let mut order = input.into_order(order_id, Utc::now());
        order.inventory_reserved = true;
        tx.insert_order(&order).await?;

        tracing::info!(%order_id, status = %order.status, "order created");
        Ok(OrderUpsertResult {
            order,
            created: true,
            updated: false,
            inventory_reserved: true,
            line_items_changed: false,
        })
    }

    async fn update(
        tx: &mut S::Tx,
        mut order: Order,
        input: OrderUpsertInput,
    ) -> Result<OrderUpsertResult> {
        let status_changed = order.status != input.status;
        let scalars_changed = status_changed
            || order.total_amount != input.total_amount
            || order.customer_email != input.customer_email
            || order.customer_name != input.customer_name;
        let line_items_changed = line_items_differ(&order.line_items, &input.line_items);

        if !scalars_changed && !line_items_changed {
            tracing::debug!(order_id = %order.id, "order unchanged");
            let inventory_reserved = order.inventory_reserved;
            return Ok(OrderUpsertResult {
                order,
                created: false,
                updated: false,
                inventory_reserved,
                line_items_changed: false,
            });
        }

        if status_changed {
            OrderStateMachine::assert_valid_transition(order.status, input.status)?;
        }

        let previous_status = order.status;
        order.status = input.status;
        order.total_amount = input.total_amount;
        order.customer_email = input.customer_email;
        order.customer_name = input.customer_name;
        if input.shipping_address.is_some() {
            order.shipping_address = input.shipping_address;
        }
        if input.billing_address.is_some() {
            order.billing_address = input.billing_address;
        }
        if let Some(metadata) = input.metadata {
            order.metadata = metadata;
        }
        order.updated_at = Utc::now();
        tx.update_order(&order).await?;

        if line_items_changed {
            let removed = tx.delete_line_items(order.id).await?;
            tx.insert_line_items(order.id, &input.line_items).await?;
            tracing::debug!(order_id = %order.id, removed, added = input.line_items.len(), "line items replaced");
            order.line_items = input.line_items;
        }

        if status_changed {
            metrics::counter!("order_status_transitions_total").increment(1);
        }
        tracing::info!(
            order_id = %order.id,
            from = %previous_status,
            to = %order.status,
            line_items_changed,
            "order updated"
        );

        let inventory_reserved = order.inventory_reserved;
        Ok(OrderUpsertResult {
            order,
            created: false,
            updated: true,
            inventory_reserved,
            line_items_changed,
        })
    }
}
