//! Shared application state.

use std::sync::Arc;

use lifecycle::{EventPublisher, InMemoryInventoryService, OrderService, OrderUpsertService};
use order_store::OrderStore;

/// Publisher shared by every service instance.
pub type SharedPublisher = Arc<dyn EventPublisher>;

/// Services behind the HTTP handlers.
///
/// Inventory is the in-memory collaborator; SKUs without configured stock
/// are unlimited.
pub struct AppState<S: OrderStore> {
    pub upserts: OrderUpsertService<S, InMemoryInventoryService>,
    pub orders: OrderService<S, InMemoryInventoryService, SharedPublisher>,
    /// Name of the store backend, reported by `/health`.
    pub backend: &'static str,
}

impl<S: OrderStore + Clone> AppState<S> {
    pub fn new(
        store: S,
        inventory: InMemoryInventoryService,
        publisher: SharedPublisher,
        backend: &'static str,
    ) -> Self {
        Self {
            upserts: OrderUpsertService::new(store.clone(), inventory.clone()),
            orders: OrderService::new(store, inventory, publisher),
            backend,
        }
    }
}
