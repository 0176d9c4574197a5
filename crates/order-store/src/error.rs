use common::{OrderId, OrganizationId};
use thiserror::Error;

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Waiting for a transaction-scoped lock exceeded the configured timeout.
    #[error("Timed out waiting for lock on '{key}'")]
    LockTimeout { key: String },

    /// An order with the same organization, channel and external id exists.
    #[error("Order '{idempotency_key}' already exists in organization {organization_id}")]
    DuplicateOrder {
        organization_id: OrganizationId,
        idempotency_key: String,
    },

    /// An update targeted a row that does not exist in the organization.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The transaction could not be committed. Nothing was written.
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// A stored row could not be mapped back to the domain model.
    #[error("Corrupt order row: {0}")]
    Decode(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true for failures a caller may retry as-is.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::LockTimeout { .. } | StoreError::CommitFailed(_)
        )
    }
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
