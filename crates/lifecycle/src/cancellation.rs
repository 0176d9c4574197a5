//! Order cancellation with inventory release.

use chrono::Utc;
use common::{OrderId, OrganizationId};
use domain::{CancellationSource, OrderCancelledData, OrderEvent, OrderStatus};
use order_store::{OrderStore, OrderTransaction};
use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};
use crate::publisher::EventPublisher;
use crate::services::inventory::{InventoryLine, InventoryService, ReleaseRequest};

/// Statuses from which an order may be cancelled.
pub const CANCELLABLE_STATUSES: &[OrderStatus] = &[
    OrderStatus::Pending,
    OrderStatus::Confirmed,
    OrderStatus::Processing,
];

/// Request to cancel one order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationInput {
    pub order_id: OrderId,
    pub organization_id: OrganizationId,
    pub reason: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub source: CancellationSource,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationResult {
    pub cancelled: bool,
    /// The order was cancelled by an earlier call; nothing was written.
    pub already_cancelled: bool,
    pub inventory_released: bool,
    pub reason: String,
    pub order_id: OrderId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<OrderStatus>,
}

/// Cancels orders and returns their reserved stock.
///
/// Works on the internal order id under a row lock, so it does not take the
/// idempotency lock used by upserts.
pub struct OrderCancellationService<S, I, P>
where
    S: OrderStore,
    I: InventoryService<S::Tx>,
    P: EventPublisher,
{
    store: S,
    inventory: I,
    publisher: P,
}

impl<S, I, P> OrderCancellationService<S, I, P>
where
    S: OrderStore,
    I: InventoryService<S::Tx>,
    P: EventPublisher,
{
    pub fn new(store: S, inventory: I, publisher: P) -> Self {
        Self {
            store,
            inventory,
            publisher,
        }
    }

    /// Moves the order to CANCELLED, releasing stock if it holds any.
    ///
    /// Cancelling an already-cancelled order succeeds without writing. The
    /// release call and the status write share one transaction: if either
    /// fails, neither happens. `order.cancelled` is published after commit.
    #[tracing::instrument(
        skip(self, input),
        fields(
            order_id = %input.order_id,
            organization_id = %input.organization_id,
            source = %input.source,
        )
    )]
    pub async fn cancel_order(&self, input: CancellationInput) -> Result<CancellationResult> {
        if input.reason.trim().is_empty() {
            return Err(LifecycleError::Validation(
                "cancellation reason is required".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;
        let mut order = tx
            .find_for_update(&input.organization_id, input.order_id)
            .await?
            .ok_or(LifecycleError::OrderNotFound {
                order_id: input.order_id,
            })?;

        if order.status == OrderStatus::Cancelled {
            tx.rollback().await?;
            metrics::counter!("order_cancellations_total", "outcome" => "already_cancelled")
                .increment(1);
            tracing::debug!("order already cancelled");
            return Ok(CancellationResult {
                cancelled: true,
                already_cancelled: true,
                inventory_released: false,
                reason: order.cancellation_reason.unwrap_or(input.reason),
                order_id: order.id,
                previous_status: None,
            });
        }

        if !CANCELLABLE_STATUSES.contains(&order.status) {
            return Err(LifecycleError::NotCancellable {
                order_id: order.id,
                status: order.status,
                allowed: CANCELLABLE_STATUSES,
            });
        }

        let previous_status = order.status;
        let inventory_released = order.inventory_reserved && !order.line_items.is_empty();
        if inventory_released {
            let request = ReleaseRequest {
                order_id: order.id,
                line_items: order.line_items.iter().map(InventoryLine::from).collect(),
            };
            self.inventory.release_for_order(&mut tx, request).await?;
        }

        let now = Utc::now();
        order.status = OrderStatus::Cancelled;
        order.inventory_reserved = false;
        order.cancellation_reason = Some(input.reason.clone());
        order.cancelled_at = Some(now);
        order.updated_at = now;
        tx.update_order(&order).await?;
        tx.commit().await?;

        metrics::counter!("order_cancellations_total", "outcome" => "cancelled").increment(1);
        tracing::info!(from = %previous_status, inventory_released, "order cancelled");

        let event = OrderEvent::OrderCancelled(OrderCancelledData {
            order_id: order.id,
            organization_id: order.organization_id.clone(),
            previous_status,
            new_status: OrderStatus::Cancelled,
            reason: input.reason.clone(),
            note: input.note,
            source: input.source,
            inventory_released,
            line_items: order.line_items,
            timestamp: now,
        });
        if let Err(err) = self.publisher.publish(&event).await {
            tracing::warn!(error = %err, "failed to publish order.cancelled");
        }

        Ok(CancellationResult {
            cancelled: true,
            already_cancelled: false,
            inventory_released,
            reason: input.reason,
            order_id: order.id,
            previous_status: Some(previous_status),
        })
    }
}
