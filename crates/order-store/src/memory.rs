use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use common::{ChannelId, OrderId, OrganizationId};
use domain::{IdempotencyKey, LineItem, Order};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    Result, StoreConfig, StoreError,
    store::{CompletionHook, CompletionHooks, OrderStore, OrderTransaction, TxOutcome},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LockName {
    /// Advisory lock on a hashed idempotency key.
    Key(i32),
    /// Row lock on one order.
    Row(OrderId),
}

#[derive(Default)]
struct Inner {
    orders: RwLock<HashMap<OrderId, Order>>,
    locks: StdMutex<HashMap<LockName, Arc<Mutex<()>>>>,
    config: StoreConfig,
    insert_count: AtomicUsize,
    fail_on_commit: AtomicBool,
}

impl Inner {
    fn lock_handle(&self, name: LockName) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(name).or_default().clone()
    }

    /// Drops the map entry for `name` once nobody holds or waits on it.
    ///
    /// Every handle is cloned out of the map under the map lock, so a count
    /// of one seen under that lock means the map owns the only reference.
    fn prune_lock(&self, name: LockName) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&name)
            .is_some_and(|handle| Arc::strong_count(handle) == 1)
        {
            locks.remove(&name);
        }
    }
}

/// A named lock owned by a transaction. Releases and prunes on drop.
struct HeldLock {
    name: LockName,
    guard: Option<OwnedMutexGuard<()>>,
    inner: Arc<Inner>,
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        self.guard.take();
        self.inner.prune_lock(self.name);
    }
}

/// In-memory order store for testing and single-process development.
///
/// Provides the same transactional contract as the PostgreSQL store: named
/// locks live as long as the transaction, writes are staged and applied
/// atomically on commit, and uniqueness of the idempotency triple is
/// enforced at insert and again at commit.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    inner: Arc<Inner>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store with the given configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                ..Inner::default()
            }),
        }
    }

    /// Returns the number of committed orders.
    pub async fn order_count(&self) -> usize {
        self.inner.orders.read().await.len()
    }

    /// Returns how many order rows have ever been committed by an insert.
    pub fn insert_count(&self) -> usize {
        self.inner.insert_count.load(Ordering::SeqCst)
    }

    /// Returns a committed order regardless of organization.
    pub async fn get(&self, order_id: OrderId) -> Option<Order> {
        self.inner.orders.read().await.get(&order_id).cloned()
    }

    /// Returns how many named locks are currently tracked.
    pub fn lock_entry_count(&self) -> usize {
        self.inner
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Makes every subsequent commit fail until reset.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.inner.fail_on_commit.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(InMemoryTransaction {
            inner: self.inner.clone(),
            staged: HashMap::new(),
            inserted: HashSet::new(),
            held: HashSet::new(),
            guards: Vec::new(),
            hooks: CompletionHooks::default(),
        })
    }
}

/// Transaction over an [`InMemoryOrderStore`].
pub struct InMemoryTransaction {
    inner: Arc<Inner>,
    /// Full rows written in this transaction, keyed by order id.
    staged: HashMap<OrderId, Order>,
    inserted: HashSet<OrderId>,
    held: HashSet<LockName>,
    guards: Vec<HeldLock>,
    hooks: CompletionHooks,
}

impl InMemoryTransaction {
    async fn lock(&mut self, name: LockName, label: &str) -> Result<()> {
        if self.held.contains(&name) {
            return Ok(());
        }

        let handle = self.inner.lock_handle(name);
        let started = Instant::now();
        let acquired =
            tokio::time::timeout(self.inner.config.lock_timeout, handle.lock_owned()).await;
        let Ok(guard) = acquired else {
            self.inner.prune_lock(name);
            metrics::counter!("order_store_lock_timeouts_total").increment(1);
            return Err(StoreError::LockTimeout {
                key: label.to_string(),
            });
        };
        metrics::histogram!("order_store_lock_wait_seconds")
            .record(started.elapsed().as_secs_f64());

        self.held.insert(name);
        self.guards.push(HeldLock {
            name,
            guard: Some(guard),
            inner: self.inner.clone(),
        });
        Ok(())
    }

    /// Current view of a row: staged write first, then committed state.
    async fn current(&mut self, order_id: OrderId) -> Option<Order> {
        if let Some(order) = self.staged.get(&order_id) {
            return Some(order.clone());
        }
        self.inner.orders.read().await.get(&order_id).cloned()
    }

    async fn current_in_org(
        &mut self,
        organization_id: &OrganizationId,
        order_id: OrderId,
    ) -> Option<Order> {
        self.current(order_id)
            .await
            .filter(|order| order.is_owned_by(organization_id))
    }
}

fn same_triple(a: &Order, b: &Order) -> bool {
    a.organization_id == b.organization_id
        && a.channel_id == b.channel_id
        && a.external_id == b.external_id
}

fn duplicate(order: &Order) -> StoreError {
    StoreError::DuplicateOrder {
        organization_id: order.organization_id.clone(),
        idempotency_key: order.idempotency_key().to_string(),
    }
}

#[async_trait]
impl OrderTransaction for InMemoryTransaction {
    async fn acquire_lock(&mut self, key: &IdempotencyKey) -> Result<()> {
        self.lock(LockName::Key(key.lock_id()), key.as_str()).await
    }

    async fn find_by_external_id(
        &mut self,
        organization_id: &OrganizationId,
        channel_id: &ChannelId,
        external_id: &str,
    ) -> Result<Option<Order>> {
        let is_match = |order: &Order| {
            &order.organization_id == organization_id
                && &order.channel_id == channel_id
                && order.external_id == external_id
        };

        if let Some(order) = self.staged.values().find(|&o| is_match(o)) {
            return Ok(Some(order.clone()));
        }
        let orders = self.inner.orders.read().await;
        Ok(orders.values().find(|&o| is_match(o)).cloned())
    }

    async fn find_by_id(
        &mut self,
        organization_id: &OrganizationId,
        order_id: OrderId,
    ) -> Result<Option<Order>> {
        Ok(self.current_in_org(organization_id, order_id).await)
    }

    async fn find_for_update(
        &mut self,
        organization_id: &OrganizationId,
        order_id: OrderId,
    ) -> Result<Option<Order>> {
        // Only lock rows that exist in the caller's organization, so the
        // outcome for a foreign id is indistinguishable from a missing one.
        if self.current_in_org(organization_id, order_id).await.is_none() {
            return Ok(None);
        }
        self.lock(LockName::Row(order_id), &order_id.to_string())
            .await?;
        Ok(self.current_in_org(organization_id, order_id).await)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        let taken_in_tx = self.staged.values().any(|o| same_triple(o, order));
        let taken = taken_in_tx
            || self
                .inner
                .orders
                .read()
                .await
                .values()
                .any(|o| same_triple(o, order));
        if taken {
            return Err(duplicate(order));
        }

        self.inserted.insert(order.id);
        self.staged.insert(order.id, order.clone());
        Ok(())
    }

    async fn update_order(&mut self, order: &Order) -> Result<()> {
        let mut row = self
            .current_in_org(&order.organization_id, order.id)
            .await
            .ok_or(StoreError::OrderNotFound(order.id))?;

        let line_items = std::mem::take(&mut row.line_items);
        row = order.clone();
        row.line_items = line_items;
        self.staged.insert(order.id, row);
        Ok(())
    }

    async fn delete_line_items(&mut self, order_id: OrderId) -> Result<u64> {
        let Some(mut row) = self.current(order_id).await else {
            return Ok(0);
        };
        let removed = row.line_items.len() as u64;
        row.line_items.clear();
        self.staged.insert(order_id, row);
        Ok(removed)
    }

    async fn insert_line_items(&mut self, order_id: OrderId, items: &[LineItem]) -> Result<()> {
        let mut row = self
            .current(order_id)
            .await
            .ok_or(StoreError::OrderNotFound(order_id))?;
        row.line_items.extend_from_slice(items);
        row.updated_at = row.updated_at.max(Utc::now());
        self.staged.insert(order_id, row);
        Ok(())
    }

    fn on_complete(&mut self, hook: CompletionHook) {
        self.hooks.push(hook);
    }

    async fn commit(mut self) -> Result<()> {
        if self.inner.fail_on_commit.load(Ordering::SeqCst) {
            return Err(StoreError::CommitFailed(
                "commit failure injected".to_string(),
            ));
        }

        let mut orders = self.inner.orders.write().await;

        // Unique constraint, for writers that skipped the advisory lock.
        for id in &self.inserted {
            if let Some(order) = self.staged.get(id)
                && orders.values().any(|o| o.id != *id && same_triple(o, order))
            {
                return Err(duplicate(order));
            }
        }

        let inserted = self.inserted.len();
        orders.extend(std::mem::take(&mut self.staged));
        self.inner.insert_count.fetch_add(inserted, Ordering::SeqCst);
        drop(orders);
        self.hooks.finish(TxOutcome::Committed);

        // Guards drop here, after the writes are visible.
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        self.hooks.finish(TxOutcome::RolledBack);
        Ok(())
    }
}
