//! Transactional storage for orders.
//!
//! Every operation runs inside an [`OrderTransaction`] obtained from an
//! [`OrderStore`]. Transactions can take a named lock scoped to their own
//! lifetime, which is how concurrent upserts of the same logical order are
//! serialized.

pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use memory::{InMemoryOrderStore, InMemoryTransaction};
pub use postgres::{PostgresOrderStore, PostgresTransaction};
pub use store::{CompletionHook, CompletionHooks, OrderStore, OrderTransaction, TxOutcome};
