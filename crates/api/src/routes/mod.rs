//! Route handlers and the state they share.

pub mod admin;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod payments;
pub mod users;

use std::sync::Arc;

use common::AggregateId;
use event_store::EventStore;
use projections::{ProjectionProcessor, ReconciliationQueue, UserOrdersView};
use reconciliation::{
    InMemoryCartStore, InMemoryCatalog, InMemoryCommerceSystem, InMemoryPaymentProcessor,
    ReconciliationCoordinator, TracingNotifier,
};

use crate::error::ApiError;

/// Coordinator wired to the in-memory stand-ins for the external systems.
pub type AppCoordinator<S> = ReconciliationCoordinator<
    S,
    InMemoryCatalog,
    InMemoryCartStore,
    InMemoryPaymentProcessor,
    InMemoryCommerceSystem,
    TracingNotifier,
>;

/// Handles onto the in-memory external systems. Clones share state with
/// the copies held by the coordinator.
#[derive(Clone, Default)]
pub struct Backends {
    pub catalog: InMemoryCatalog,
    pub carts: InMemoryCartStore,
    pub processor: InMemoryPaymentProcessor,
    pub commerce: InMemoryCommerceSystem,
}

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub coordinator: Arc<AppCoordinator<S>>,
    pub projection_processor: Arc<ProjectionProcessor<S>>,
    pub user_orders: UserOrdersView,
    pub queue: ReconciliationQueue,
    pub backends: Backends,
}

/// Listing size when the caller gives none.
pub(crate) const DEFAULT_LIST_LIMIT: usize = 20;
pub(crate) const MAX_LIST_LIMIT: usize = 100;

pub(crate) fn list_limit(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT)
}

pub(crate) fn parse_aggregate_id(id: &str) -> Result<AggregateId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(AggregateId::from(uuid))
}
