use async_trait::async_trait;
use common::{ChannelId, OrderId, OrganizationId};
use domain::{IdempotencyKey, LineItem, Order};

use crate::Result;

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Committed,
    RolledBack,
}

/// Callback registered with [`OrderTransaction::on_complete`].
pub type CompletionHook = Box<dyn FnOnce(TxOutcome) + Send + 'static>;

/// Pending completion hooks of one transaction.
///
/// Hooks still pending when this is dropped run with
/// [`TxOutcome::RolledBack`], which covers failed commits and transactions
/// abandoned mid-flight.
#[derive(Default)]
pub struct CompletionHooks {
    hooks: Vec<CompletionHook>,
}

impl CompletionHooks {
    pub fn push(&mut self, hook: CompletionHook) {
        self.hooks.push(hook);
    }

    /// Runs every pending hook, in registration order.
    pub fn finish(&mut self, outcome: TxOutcome) {
        for hook in self.hooks.drain(..) {
            hook(outcome);
        }
    }
}

impl Drop for CompletionHooks {
    fn drop(&mut self) {
        self.finish(TxOutcome::RolledBack);
    }
}

/// Entry point of a transactional order store.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Transaction handle produced by [`begin`](Self::begin).
    type Tx: OrderTransaction;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Tx>;
}

/// A unit of work against the store.
///
/// Nothing written through a transaction is visible to others until
/// [`commit`](Self::commit) succeeds. Dropping a transaction without
/// committing rolls it back and releases every lock it holds.
#[async_trait]
pub trait OrderTransaction: Send {
    /// Takes the named lock for `key`, waiting up to the configured timeout.
    ///
    /// The lock is held until the transaction ends. Taking the same key twice
    /// in one transaction is a no-op.
    async fn acquire_lock(&mut self, key: &IdempotencyKey) -> Result<()>;

    /// Looks up an order by its idempotency triple.
    async fn find_by_external_id(
        &mut self,
        organization_id: &OrganizationId,
        channel_id: &ChannelId,
        external_id: &str,
    ) -> Result<Option<Order>>;

    /// Looks up an order by internal id within one organization.
    async fn find_by_id(
        &mut self,
        organization_id: &OrganizationId,
        order_id: OrderId,
    ) -> Result<Option<Order>>;

    /// Like [`find_by_id`](Self::find_by_id), but also locks the row until
    /// the transaction ends so conflicting writers queue behind this one.
    async fn find_for_update(
        &mut self,
        organization_id: &OrganizationId,
        order_id: OrderId,
    ) -> Result<Option<Order>>;

    /// Inserts the order row together with its line items.
    ///
    /// Fails with `DuplicateOrder` if the idempotency triple is taken.
    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    /// Writes the scalar columns of an existing order. Line items are left
    /// untouched.
    async fn update_order(&mut self, order: &Order) -> Result<()>;

    /// Deletes every line item of an order. Returns the number removed.
    async fn delete_line_items(&mut self, order_id: OrderId) -> Result<u64>;

    /// Appends line items to an order.
    async fn insert_line_items(&mut self, order_id: OrderId, items: &[LineItem]) -> Result<()>;

    /// Registers a callback to run once when the transaction ends.
    ///
    /// Runs with [`TxOutcome::Committed`] after a successful commit and with
    /// [`TxOutcome::RolledBack`] otherwise, including when the commit itself
    /// fails or the transaction is dropped.
    fn on_complete(&mut self, hook: CompletionHook);

    /// Makes every write visible and releases locks.
    async fn commit(self) -> Result<()>;

    /// Discards every write and releases locks.
    async fn rollback(self) -> Result<()>;
}
