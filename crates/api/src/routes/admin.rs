//! Administrator listings.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use event_store::EventStore;
use projections::{DueOrder, OrderSummary};

use super::users::ListParams;
use super::{AppState, list_limit};
use crate::error::ApiError;

/// GET /admin/orders: most recently created orders across all users.
#[tracing::instrument(skip(state))]
pub async fn recent_orders<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<OrderSummary>>, ApiError> {
    state.projection_processor.run_catch_up().await?;
    let orders = state
        .user_orders
        .recent_orders(list_limit(params.limit))
        .await;
    Ok(Json(orders))
}

/// GET /admin/reconciliation: orders the sweep will revisit, longest waiting first.
#[tracing::instrument(skip(state))]
pub async fn due_orders<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<DueOrder>>, ApiError> {
    state.projection_processor.run_catch_up().await?;
    Ok(Json(state.queue.due_orders().await))
}
