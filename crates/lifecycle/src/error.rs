//! Lifecycle error types.

use common::OrderId;
use domain::{OrderError, OrderStatus};
use order_store::StoreError;
use thiserror::Error;

use crate::services::inventory::{InventoryError, StockShortfall};

/// Broad class of a failure, used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before any side effect.
    Validation,
    /// The order does not exist in the caller's organization.
    NotFound,
    /// A business rule forbids the operation.
    Conflict,
    /// A collaborator or the store failed; the transaction was rolled back.
    Infrastructure,
}

/// Errors that can occur during order lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Input failed structural validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Order not found in the caller's organization.
    #[error("Order not found: {order_id}")]
    OrderNotFound { order_id: OrderId },

    /// A domain rule was violated (e.g. an illegal status transition).
    #[error("{0}")]
    Order(#[from] OrderError),

    /// The order is past the point where it can be cancelled.
    #[error(
        "Order {order_id} cannot be cancelled in status {status}; cancellable statuses: {}",
        format_statuses(.allowed)
    )]
    NotCancellable {
        order_id: OrderId,
        status: OrderStatus,
        allowed: &'static [OrderStatus],
    },

    /// Inventory declined the reservation. No order was created.
    #[error(
        "Insufficient stock for order '{idempotency_key}': {}",
        format_shortfalls(.shortfalls)
    )]
    InsufficientStock {
        idempotency_key: String,
        shortfalls: Vec<StockShortfall>,
    },

    /// Inventory collaborator error.
    #[error("Inventory service error: {0}")]
    Inventory(#[from] InventoryError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::Validation(_) => ErrorKind::Validation,
            LifecycleError::OrderNotFound { .. } => ErrorKind::NotFound,
            LifecycleError::Order(OrderError::UnknownStatus(_)) => ErrorKind::Validation,
            LifecycleError::Order(OrderError::InvalidTransition { .. })
            | LifecycleError::NotCancellable { .. }
            | LifecycleError::InsufficientStock { .. } => ErrorKind::Conflict,
            LifecycleError::Store(StoreError::OrderNotFound(_)) => ErrorKind::NotFound,
            LifecycleError::Store(StoreError::DuplicateOrder { .. }) => ErrorKind::Conflict,
            LifecycleError::Inventory(_) | LifecycleError::Store(_) => ErrorKind::Infrastructure,
        }
    }

    /// Returns true if retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LifecycleError::Store(err) => err.is_transient(),
            LifecycleError::Inventory(_) => true,
            _ => false,
        }
    }
}

fn format_statuses(statuses: &[OrderStatus]) -> String {
    statuses
        .iter()
        .map(OrderStatus::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_shortfalls(shortfalls: &[StockShortfall]) -> String {
    shortfalls
        .iter()
        .map(|s| format!("{} (requested {}, available {})", s.sku, s.requested, s.available))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience type alias for lifecycle results.
pub type Result<T> = std::result::Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Sku;

    #[test]
    fn test_not_cancellable_message_lists_allowed_states() {
        let err = LifecycleError::NotCancellable {
            order_id: OrderId::new(),
            status: OrderStatus::Shipped,
            allowed: &[
                OrderStatus::Pending,
                OrderStatus::Confirmed,
                OrderStatus::Processing,
            ],
        };
        let message = err.to_string();
        assert!(message.contains("SHIPPED"));
        assert!(message.contains("PENDING, CONFIRMED, PROCESSING"));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_insufficient_stock_message() {
        let err = LifecycleError::InsufficientStock {
            idempotency_key: "shop:1".to_string(),
            shortfalls: vec![StockShortfall {
                sku: Sku::new("A"),
                requested: 3,
                available: 1,
            }],
        };
        assert!(err.to_string().contains("A (requested 3, available 1)"));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            LifecycleError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            LifecycleError::OrderNotFound {
                order_id: OrderId::new()
            }
            .kind(),
            ErrorKind::NotFound
        );
        let timeout = LifecycleError::Store(StoreError::LockTimeout { key: "k".into() });
        assert_eq!(timeout.kind(), ErrorKind::Infrastructure);
        assert!(timeout.is_retryable());
    }
}
