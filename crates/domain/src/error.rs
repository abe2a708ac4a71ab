//! Domain error types.

use common::AggregateId;
use event_store::EventStoreError;
use thiserror::Error;

use crate::checkout::GuardError;
use crate::customer::CustomerError;
use crate::order::OrderError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Checkout guard error: {0}")]
    Guard(#[from] GuardError),

    #[error("Customer link error: {0}")]
    Customer(#[from] CustomerError),

    #[error("Order not found: {0}")]
    OrderNotFound(AggregateId),

    /// Gave up after repeatedly losing races on one stream.
    #[error("Too much contention on {0}")]
    Contended(AggregateId),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// True when another writer got there first and the caller should
    /// re-read instead of treating this as a failure.
    pub fn is_stale(&self) -> bool {
        match self {
            DomainError::EventStore(e) => e.is_conflict(),
            DomainError::Order(OrderError::StaleState { .. })
            | DomainError::Order(OrderError::SyncInProgress { .. })
            | DomainError::Guard(GuardError::Moved { .. })
            | DomainError::Contended(_) => true,
            _ => false,
        }
    }

    /// Maps "the aggregate has no events" onto a not-found error for `id`.
    pub(crate) fn or_not_found(self, id: AggregateId) -> Self {
        match self {
            DomainError::Order(OrderError::NotCreated) => DomainError::OrderNotFound(id),
            other => other,
        }
    }
}
