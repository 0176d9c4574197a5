//! Order domain events.
//!
//! Emitted only after the transaction that produced them has committed.

use chrono::{DateTime, Utc};
use common::{OrderId, OrganizationId};
use serde::{Deserialize, Serialize};

use crate::event::DomainEvent;

use super::{LineItem, OrderStatus};

/// Who asked for a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CancellationSource {
    /// A merchant or operator through the API.
    #[default]
    Api,

    /// The sales channel, via webhook.
    Webhook,

    /// An internal process, e.g. a status update targeting CANCELLED.
    System,
}

impl std::fmt::Display for CancellationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CancellationSource::Api => "api",
            CancellationSource::Webhook => "webhook",
            CancellationSource::System => "system",
        };
        f.write_str(name)
    }
}

/// Events that can occur on an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was cancelled.
    #[serde(rename = "order.cancelled")]
    OrderCancelled(OrderCancelledData),

    /// Order status moved forward through the status endpoint.
    #[serde(rename = "order.status_changed")]
    OrderStatusChanged(OrderStatusChangedData),
}

impl OrderEvent {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderEvent::OrderCancelled(data) => data.order_id,
            OrderEvent::OrderStatusChanged(data) => data.order_id,
        }
    }
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCancelled(_) => "order.cancelled",
            OrderEvent::OrderStatusChanged(_) => "order.status_changed",
        }
    }
}

/// Data for the `order.cancelled` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub order_id: OrderId,
    pub organization_id: OrganizationId,

    /// Status the order had before cancellation.
    pub previous_status: OrderStatus,

    /// Always `Cancelled`.
    pub new_status: OrderStatus,

    pub reason: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    pub source: CancellationSource,

    /// Whether reserved stock was handed back to inventory.
    pub inventory_released: bool,

    pub line_items: Vec<LineItem>,
    pub timestamp: DateTime<Utc>,
}

/// Data for the `order.status_changed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusChangedData {
    pub order_id: OrderId,
    pub organization_id: OrganizationId,
    pub previous_status: OrderStatus,
    pub new_status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        let event = OrderEvent::OrderStatusChanged(OrderStatusChangedData {
            order_id: OrderId::new(),
            organization_id: OrganizationId::new("org-A"),
            previous_status: OrderStatus::Pending,
            new_status: OrderStatus::Confirmed,
            timestamp: Utc::now(),
        });
        assert_eq!(event.event_type(), "order.status_changed");
    }

    #[test]
    fn test_cancelled_event_serializes_with_tag() {
        let order_id = OrderId::new();
        let event = OrderEvent::OrderCancelled(OrderCancelledData {
            order_id,
            organization_id: OrganizationId::new("org-A"),
            previous_status: OrderStatus::Confirmed,
            new_status: OrderStatus::Cancelled,
            reason: "customer request".to_string(),
            note: None,
            source: CancellationSource::Webhook,
            inventory_released: true,
            line_items: vec![],
            timestamp: Utc::now(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "order.cancelled");
        assert_eq!(json["data"]["previous_status"], "CONFIRMED");
        assert_eq!(json["data"]["source"], "webhook");
        assert!(json["data"].get("note").is_none());
        assert_eq!(event.order_id(), order_id);
    }
}
