//! Inventory service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::{OrderId, OrganizationId};
use domain::{LineItem, Sku};
use order_store::{OrderTransaction, TxOutcome};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by an inventory backend.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The backend could not be reached or refused the call.
    #[error("Inventory unavailable: {0}")]
    Unavailable(String),
}

/// A quantity of one SKU to reserve or release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLine {
    pub sku: Sku,
    pub quantity: i32,
}

impl From<&LineItem> for InventoryLine {
    fn from(item: &LineItem) -> Self {
        Self {
            sku: item.sku.clone(),
            quantity: item.quantity,
        }
    }
}

/// Request to reserve stock for a new order.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub organization_id: OrganizationId,
    pub order_id: OrderId,
    pub line_items: Vec<InventoryLine>,
}

/// Request to return a cancelled order's stock.
#[derive(Debug, Clone)]
pub struct ReleaseRequest {
    pub order_id: OrderId,
    pub line_items: Vec<InventoryLine>,
}

/// A SKU that could not be fully reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortfall {
    pub sku: Sku,
    pub requested: i64,
    pub available: i64,
}

/// Outcome of a reservation attempt that reached the backend.
///
/// A declined reservation is a business outcome, not an error: `success` is
/// false and `shortfalls` names the SKUs that were short.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReservationOutcome {
    pub success: bool,
    pub shortfalls: Vec<StockShortfall>,
}

impl ReservationOutcome {
    pub fn reserved() -> Self {
        Self {
            success: true,
            shortfalls: Vec::new(),
        }
    }

    pub fn rejected(shortfalls: Vec<StockShortfall>) -> Self {
        Self {
            success: false,
            shortfalls,
        }
    }
}

/// Stock reservation collaborator.
///
/// Both calls receive the caller's open transaction so a store-backed
/// implementation can enlist in the same unit of work; whatever it writes
/// commits or rolls back together with the order.
#[async_trait]
pub trait InventoryService<Tx: Send>: Send + Sync {
    /// Reserves stock for every line of a new order.
    async fn reserve_for_order(
        &self,
        tx: &mut Tx,
        request: ReserveRequest,
    ) -> Result<ReservationOutcome, InventoryError>;

    /// Returns stock previously reserved for an order.
    async fn release_for_order(
        &self,
        tx: &mut Tx,
        request: ReleaseRequest,
    ) -> Result<(), InventoryError>;
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    stock: HashMap<(OrganizationId, Sku), i64>,
    reservations: HashMap<OrderId, (OrganizationId, Vec<InventoryLine>)>,
    reserve_calls: usize,
    release_calls: usize,
    fail_on_reserve: bool,
    fail_on_release: bool,
}

/// In-memory inventory for tests and the database-less server.
///
/// SKUs without a configured stock level are treated as unlimited.
///
/// Calls enlist in the caller's transaction through completion hooks. A
/// reservation holds stock immediately, so concurrent orders cannot both
/// take the last unit, and hands it back if the transaction does not
/// commit. A release only returns stock once the transaction commits.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryService {
    /// Creates a new in-memory inventory service.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryInventoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryInventoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the available quantity of a SKU for an organization.
    pub fn set_stock(&self, organization_id: &OrganizationId, sku: impl Into<Sku>, quantity: i64) {
        self.write()
            .stock
            .insert((organization_id.clone(), sku.into()), quantity);
    }

    /// Returns the available quantity, or `None` if the SKU is untracked.
    pub fn available(&self, organization_id: &OrganizationId, sku: impl Into<Sku>) -> Option<i64> {
        self.read()
            .stock
            .get(&(organization_id.clone(), sku.into()))
            .copied()
    }

    /// Makes every subsequent reserve call fail with an error.
    pub fn set_fail_on_reserve(&self, fail: bool) {
        self.write().fail_on_reserve = fail;
    }

    /// Makes every subsequent release call fail with an error.
    pub fn set_fail_on_release(&self, fail: bool) {
        self.write().fail_on_release = fail;
    }

    /// Number of reserve calls received, including failed ones.
    pub fn reserve_calls(&self) -> usize {
        self.read().reserve_calls
    }

    /// Number of release calls received, including failed ones.
    pub fn release_calls(&self) -> usize {
        self.read().release_calls
    }

    /// Returns the number of active reservations.
    pub fn reservation_count(&self) -> usize {
        self.read().reservations.len()
    }

    /// Returns true if stock is currently held for the order.
    pub fn has_reservation(&self, order_id: OrderId) -> bool {
        self.read().reservations.contains_key(&order_id)
    }
}

impl InMemoryInventoryState {
    /// Drops the reservation for `order_id` and returns its stock.
    fn return_stock(&mut self, order_id: OrderId) {
        let Some((organization_id, lines)) = self.reservations.remove(&order_id) else {
            return;
        };
        for line in lines {
            if let Some(level) = self.stock.get_mut(&(organization_id.clone(), line.sku)) {
                *level += i64::from(line.quantity);
            }
        }
    }
}

#[async_trait]
impl<Tx: OrderTransaction> InventoryService<Tx> for InMemoryInventoryService {
    async fn reserve_for_order(
        &self,
        tx: &mut Tx,
        request: ReserveRequest,
    ) -> Result<ReservationOutcome, InventoryError> {
        let mut state = self.write();
        state.reserve_calls += 1;

        if state.fail_on_reserve {
            return Err(InventoryError::Unavailable(
                "inventory backend rejected the call".to_string(),
            ));
        }

        let mut requested: HashMap<&Sku, i64> = HashMap::new();
        for line in &request.line_items {
            *requested.entry(&line.sku).or_default() += i64::from(line.quantity);
        }

        let mut shortfalls: Vec<StockShortfall> = requested
            .iter()
            .filter_map(|(sku, &quantity)| {
                let key = (request.organization_id.clone(), (*sku).clone());
                match state.stock.get(&key) {
                    Some(&available) if available < quantity => Some(StockShortfall {
                        sku: (*sku).clone(),
                        requested: quantity,
                        available,
                    }),
                    _ => None,
                }
            })
            .collect();

        if !shortfalls.is_empty() {
            shortfalls.sort_by(|a, b| a.sku.as_str().cmp(b.sku.as_str()));
            return Ok(ReservationOutcome::rejected(shortfalls));
        }

        for (sku, quantity) in requested {
            if let Some(level) = state
                .stock
                .get_mut(&(request.organization_id.clone(), sku.clone()))
            {
                *level -= quantity;
            }
        }
        state.reservations.insert(
            request.order_id,
            (request.organization_id.clone(), request.line_items.clone()),
        );
        drop(state);

        let shared = self.state.clone();
        let order_id = request.order_id;
        tx.on_complete(Box::new(move |outcome| {
            if outcome == TxOutcome::RolledBack {
                shared
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .return_stock(order_id);
            }
        }));

        Ok(ReservationOutcome::reserved())
    }

    async fn release_for_order(
        &self,
        tx: &mut Tx,
        request: ReleaseRequest,
    ) -> Result<(), InventoryError> {
        {
            let mut state = self.write();
            state.release_calls += 1;

            if state.fail_on_release {
                return Err(InventoryError::Unavailable(
                    "inventory backend rejected the call".to_string(),
                ));
            }
        }

        let shared = self.state.clone();
        let order_id = request.order_id;
        tx.on_complete(Box::new(move |outcome| {
            if outcome == TxOutcome::Committed {
                shared
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .return_stock(order_id);
            }
        }));
        Ok(())
    }
}
