//! Order lifecycle services.
//!
//! This crate coordinates the transactional order store with the inventory
//! collaborator:
//! - `OrderUpsertService` turns repeated or concurrent deliveries of the same
//!   channel order into one order, reserving stock exactly once
//! - `OrderCancellationService` cancels an order and releases its stock in
//!   the same transaction
//! - `OrderService` serves tenant-scoped reads and state-machine-gated status
//!   changes
//!
//! Events are handed to an `EventPublisher` only after commit.

pub mod cancellation;
pub mod error;
pub mod publisher;
pub mod service;
pub mod services;
pub mod upsert;

pub use cancellation::{
    CANCELLABLE_STATUSES, CancellationInput, CancellationResult, OrderCancellationService,
};
pub use error::{ErrorKind, LifecycleError, Result};
pub use publisher::{EventPublisher, InMemoryEventPublisher, LoggingEventPublisher, PublishError};
pub use service::{OrderService, StatusUpdateResult, UpdateStatusInput};
pub use services::{
    InMemoryInventoryService, InventoryError, InventoryLine, InventoryService, ReleaseRequest,
    ReservationOutcome, ReserveRequest, StockShortfall,
};
pub use upsert::{OrderUpsertInput, OrderUpsertResult, OrderUpsertService};
