//! Per-user checkout and order history.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use domain::UserId;
use event_store::EventStore;
use projections::OrderSummary;
use reconciliation::CheckoutStarted;
use serde::Deserialize;

use super::{AppState, list_limit};
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

/// POST /users/{user_id}/checkout: snapshot the cart into a pending order.
///
/// Answers 201 for a new order and 200 when the submission was folded into
/// an order created moments earlier.
#[tracing::instrument(skip(state))]
pub async fn checkout<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<i64>,
) -> Result<(StatusCode, Json<CheckoutStarted>), ApiError> {
    let started = state
        .coordinator
        .begin_checkout(UserId::new(user_id))
        .await?;
    let status = if started.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(started)))
}

/// GET /users/{user_id}/orders: newest first.
#[tracing::instrument(skip(state))]
pub async fn orders<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<i64>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<OrderSummary>>, ApiError> {
    state.projection_processor.run_catch_up().await?;
    let orders = state
        .user_orders
        .orders_for_user(UserId::new(user_id), list_limit(params.limit))
        .await;
    Ok(Json(orders))
}
