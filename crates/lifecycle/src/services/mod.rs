//! External service collaborators used by the lifecycle services.

pub mod inventory;

pub use inventory::{
    InMemoryInventoryService, InventoryError, InventoryLine, InventoryService, ReleaseRequest,
    ReservationOutcome, ReserveRequest, StockShortfall,
};
