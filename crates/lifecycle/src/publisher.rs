//! Post-commit event publication.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use domain::{DomainEvent, OrderEvent};
use thiserror::Error;

/// Error returned by a publisher that could not deliver an event.
#[derive(Debug, Error)]
#[error("Event publish failed: {0}")]
pub struct PublishError(pub String);

/// Sink for order events.
///
/// Called only after the producing transaction has committed. Callers log and
/// discard failures; the committed state is the source of truth.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError>;
}

#[async_trait]
impl<P: EventPublisher + ?Sized> EventPublisher for Arc<P> {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError> {
        (**self).publish(event).await
    }
}

/// Publishes events as structured log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError> {
        let payload =
            serde_json::to_string(event).map_err(|e| PublishError(e.to_string()))?;
        tracing::info!(
            event_type = event.event_type(),
            order_id = %event.order_id(),
            %payload,
            "order event published"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RecordedEvents {
    events: Vec<OrderEvent>,
    fail: bool,
}

/// Records published events in memory. Used by tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventPublisher {
    state: Arc<RwLock<RecordedEvents>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of everything published so far.
    pub fn events(&self) -> Vec<OrderEvent> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .clone()
    }

    pub fn event_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .len()
    }

    /// Makes every subsequent publish fail without recording.
    pub fn set_fail(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail = fail;
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.fail {
            return Err(PublishError("publisher is unavailable".to_string()));
        }
        state.events.push(event.clone());
        Ok(())
    }
}
