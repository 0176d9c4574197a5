//! Store settings shared by every implementation.

use std::time::Duration;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Upper bound on waiting for a transaction-scoped lock.
    pub lock_timeout: Duration,
}

impl StoreConfig {
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self { lock_timeout }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
        }
    }
}
