//! Domain layer of the order lifecycle core.
//!
//! This crate provides:
//! - `OrderStatus` and the stateless `OrderStateMachine`
//! - The persisted `Order` record with its `LineItem`s
//! - Value objects (`Money`, `Sku`, `IdempotencyKey`)
//! - `OrderEvent`s emitted after commit

pub mod event;
pub mod order;

pub use event::DomainEvent;
pub use order::{
    CancellationSource, IdempotencyKey, LineItem, Money, Order, OrderCancelledData, OrderError,
    OrderEvent, OrderStateMachine, OrderStatus, OrderStatusChangedData, Sku, TransitionRejection,
    line_items_differ, quantities_by_sku,
};
