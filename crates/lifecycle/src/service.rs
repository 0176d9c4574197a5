//! Tenant-scoped reads and state-machine-gated status changes.

use chrono::Utc;
use common::{OrderId, OrganizationId};
use domain::{
    CancellationSource, Order, OrderEvent, OrderStateMachine, OrderStatus, OrderStatusChangedData,
};
use order_store::{OrderStore, OrderTransaction};
use serde::{Deserialize, Serialize};

use crate::cancellation::{CancellationInput, OrderCancellationService};
use crate::error::{LifecycleError, Result};
use crate::publisher::EventPublisher;
use crate::services::inventory::InventoryService;

/// Request to move an order to a new status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusInput {
    pub order_id: OrderId,
    pub organization_id: OrganizationId,
    pub status: OrderStatus,
}

/// Outcome of a status change.
#[derive(Debug, Clone)]
pub struct StatusUpdateResult {
    pub order: Order,
    pub previous_status: OrderStatus,
}

/// Order operations addressed by internal id.
pub struct OrderService<S, I, P>
where
    S: OrderStore,
    I: InventoryService<S::Tx>,
    P: EventPublisher,
{
    store: S,
    cancellation: OrderCancellationService<S, I, P>,
    publisher: P,
}

impl<S, I, P> OrderService<S, I, P>
where
    S: OrderStore + Clone,
    I: InventoryService<S::Tx>,
    P: EventPublisher + Clone,
{
    pub fn new(store: S, inventory: I, publisher: P) -> Self {
        let cancellation =
            OrderCancellationService::new(store.clone(), inventory, publisher.clone());
        Self {
            store,
            cancellation,
            publisher,
        }
    }

    /// The cancellation service sharing this service's collaborators.
    pub fn cancellation(&self) -> &OrderCancellationService<S, I, P> {
        &self.cancellation
    }

    /// Loads an order within one organization.
    ///
    /// Orders of other organizations are reported as not found.
    #[tracing::instrument(skip_all, fields(organization_id = %organization_id, order_id = %order_id))]
    pub async fn get_order(
        &self,
        organization_id: &OrganizationId,
        order_id: OrderId,
    ) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let order = tx.find_by_id(organization_id, order_id).await?;
        tx.rollback().await?;
        order.ok_or(LifecycleError::OrderNotFound { order_id })
    }

    /// Applies one legal transition and publishes `order.status_changed`.
    ///
    /// A target of CANCELLED is checked against the state machine, then
    /// handed to the cancellation service so reserved stock is released.
    #[tracing::instrument(
        skip(self, input),
        fields(
            order_id = %input.order_id,
            organization_id = %input.organization_id,
            to = %input.status,
        )
    )]
    pub async fn update_status(&self, input: UpdateStatusInput) -> Result<StatusUpdateResult> {
        if input.status == OrderStatus::Cancelled {
            return self.cancel_via_status(input).await;
        }

        let mut tx = self.store.begin().await?;
        let mut order = tx
            .find_for_update(&input.organization_id, input.order_id)
            .await?
            .ok_or(LifecycleError::OrderNotFound {
                order_id: input.order_id,
            })?;

        let previous_status = order.status;
        OrderStateMachine::assert_valid_transition(previous_status, input.status)?;

        let now = Utc::now();
        order.status = input.status;
        order.updated_at = now;
        tx.update_order(&order).await?;
        tx.commit().await?;

        metrics::counter!("order_status_transitions_total").increment(1);
        tracing::info!(from = %previous_status, "order status changed");

        let event = OrderEvent::OrderStatusChanged(OrderStatusChangedData {
            order_id: order.id,
            organization_id: order.organization_id.clone(),
            previous_status,
            new_status: order.status,
            timestamp: now,
        });
        if let Err(err) = self.publisher.publish(&event).await {
            tracing::warn!(error = %err, "failed to publish order.status_changed");
        }

        Ok(StatusUpdateResult {
            order,
            previous_status,
        })
    }

    async fn cancel_via_status(&self, input: UpdateStatusInput) -> Result<StatusUpdateResult> {
        let current = self
            .get_order(&input.organization_id, input.order_id)
            .await?;
        OrderStateMachine::assert_valid_transition(current.status, OrderStatus::Cancelled)?;

        let result = self
            .cancellation
            .cancel_order(CancellationInput {
                order_id: input.order_id,
                organization_id: input.organization_id.clone(),
                reason: "status changed to CANCELLED".to_string(),
                note: None,
                source: CancellationSource::System,
            })
            .await?;

        let order = self
            .get_order(&input.organization_id, input.order_id)
            .await?;
        Ok(StatusUpdateResult {
            order,
            previous_status: result.previous_status.unwrap_or(current.status),
        })
    }
}
