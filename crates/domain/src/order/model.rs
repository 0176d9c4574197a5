//! Persisted order record and its line items.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{ChannelId, OrderId, OrganizationId};
use serde::{Deserialize, Serialize};

use super::{IdempotencyKey, Money, OrderStatus, Sku};

/// A single line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: Sku,

    /// Ordered quantity. Must be greater than zero.
    pub quantity: i32,

    pub unit_price: Money,

    /// Display name.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
}

impl LineItem {
    /// Creates a line item without a variant.
    pub fn new(
        sku: impl Into<Sku>,
        name: impl Into<String>,
        quantity: i32,
        unit_price: Money,
    ) -> Self {
        Self {
            sku: sku.into(),
            quantity,
            unit_price,
            name: name.into(),
            variant_id: None,
        }
    }

    /// Sets the variant id.
    pub fn with_variant(mut self, variant_id: impl Into<String>) -> Self {
        self.variant_id = Some(variant_id.into());
        self
    }
}

/// Total quantity per SKU. Repeated SKUs are summed.
pub fn quantities_by_sku(items: &[LineItem]) -> HashMap<&Sku, i64> {
    let mut quantities = HashMap::with_capacity(items.len());
    for item in items {
        *quantities.entry(&item.sku).or_insert(0) += i64::from(item.quantity);
    }
    quantities
}

/// Returns true if the two line-item sets differ by SKU membership, count or
/// quantity. Prices and names are not compared.
pub fn line_items_differ(existing: &[LineItem], incoming: &[LineItem]) -> bool {
    if existing.len() != incoming.len() {
        return true;
    }
    quantities_by_sku(existing) != quantities_by_sku(incoming)
}

/// One customer purchase, scoped to one organization and one sales channel.
///
/// `(organization_id, channel_id, external_id)` is unique. Orders are never
/// deleted; cancellation is a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub organization_id: OrganizationId,
    pub channel_id: ChannelId,

    /// Identifier the source channel uses for this order.
    pub external_id: String,

    pub status: OrderStatus,
    pub total_amount: Money,

    /// ISO 4217 code.
    pub currency: String,

    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub shipping_address: Option<serde_json::Value>,
    pub billing_address: Option<serde_json::Value>,
    pub metadata: serde_json::Value,

    /// Set once when stock is reserved at creation, cleared when a
    /// cancellation releases it. Never set again after release.
    pub inventory_reserved: bool,

    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub line_items: Vec<LineItem>,
}

impl Order {
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::new(&self.channel_id, &self.external_id)
    }

    /// Returns true if the order belongs to `organization_id`.
    pub fn is_owned_by(&self, organization_id: &OrganizationId) -> bool {
        &self.organization_id == organization_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(pairs: &[(&str, i32)]) -> Vec<LineItem> {
        pairs
            .iter()
            .map(|(sku, qty)| LineItem::new(*sku, *sku, *qty, Money::from_cents(100)))
            .collect()
    }

    #[test]
    fn test_identical_items_do_not_differ() {
        assert!(!line_items_differ(
            &items(&[("A", 2), ("B", 1)]),
            &items(&[("B", 1), ("A", 2)])
        ));
    }

    #[test]
    fn test_quantity_change_differs() {
        assert!(line_items_differ(
            &items(&[("A", 2), ("B", 1)]),
            &items(&[("A", 5), ("B", 1)])
        ));
    }

    #[test]
    fn test_sku_swap_differs() {
        assert!(line_items_differ(
            &items(&[("A", 2), ("B", 1)]),
            &items(&[("A", 2), ("C", 1)])
        ));
    }

    #[test]
    fn test_size_mismatch_differs() {
        assert!(line_items_differ(
            &items(&[("A", 2)]),
            &items(&[("A", 1), ("A", 1)])
        ));
        assert!(line_items_differ(&items(&[("A", 2)]), &items(&[])));
    }

    #[test]
    fn test_price_change_alone_is_not_a_difference() {
        let existing = items(&[("A", 2)]);
        let mut incoming = existing.clone();
        incoming[0].unit_price = Money::from_cents(999);
        assert!(!line_items_differ(&existing, &incoming));
    }

    #[test]
    fn test_with_variant() {
        let item = LineItem::new("A", "Widget", 3, Money::from_cents(250)).with_variant("red");
        assert_eq!(item.unit_price.cents(), 250);
        assert_eq!(item.variant_id.as_deref(), Some("red"));
    }
}
