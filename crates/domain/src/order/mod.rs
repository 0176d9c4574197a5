//! Order model, status state machine and related types.

mod events;
mod model;
mod state_machine;
mod status;
mod value_objects;

pub use events::{CancellationSource, OrderCancelledData, OrderEvent, OrderStatusChangedData};
pub use model::{LineItem, Order, line_items_differ, quantities_by_sku};
pub use state_machine::{OrderStateMachine, TransitionRejection};
pub use status::OrderStatus;
pub use value_objects::{IdempotencyKey, Money, Sku};

use thiserror::Error;

/// Errors raised by order domain rules.
#[derive(Debug, Error)]
pub enum OrderError {
    /// A status string is not one of the known values.
    #[error("Unknown order status: '{0}'")]
    UnknownStatus(String),

    /// The requested status transition is illegal.
    #[error("Invalid status transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: OrderStatus,
        to: OrderStatus,
        reason: String,
    },
}
