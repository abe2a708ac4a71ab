//! Order view, checkout confirmation, payment check and cancellation.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use domain::{
    Actor, Cancellation, DeliveryInfo, Money, Order, OrderLine, OrderState, PaymentRecord,
    RemoteLink, UserId,
};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use super::{AppState, parse_aggregate_id};
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedBy {
    User,
    Admin,
}

#[derive(Deserialize)]
pub struct CancelOrderRequest {
    pub actor: RequestedBy,
    pub user_id: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

impl CancelOrderRequest {
    fn actor(&self) -> Actor {
        let user_id = UserId::new(self.user_id);
        match self.actor {
            RequestedBy::User => Actor::User(user_id),
            RequestedBy::Admin => Actor::Admin(user_id),
        }
    }
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: Option<UserId>,
    pub state: OrderState,
    pub lines: Vec<OrderLine>,
    pub total_amount: Money,
    pub delivery: Option<DeliveryInfo>,
    pub payment: Option<PaymentRecord>,
    pub remote_link: Option<RemoteLink>,
    pub cancellation: Option<Cancellation>,
    pub failure_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderResponse {
    fn from_order(id: String, order: &Order) -> Self {
        Self {
            id,
            user_id: order.user_id(),
            state: order.state(),
            lines: order.lines().to_vec(),
            total_amount: order.total_amount(),
            delivery: order.delivery().cloned(),
            payment: order.payment().cloned(),
            remote_link: order.remote_link().cloned(),
            cancellation: order.cancellation().cloned(),
            failure_reason: order.failure_reason().map(String::from),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

#[derive(Serialize)]
pub struct PaymentRedirectResponse {
    pub order_id: String,
    pub redirect_url: String,
}

#[derive(Serialize)]
pub struct OrderStateResponse {
    pub order_id: String,
    pub state: OrderState,
}

// -- Handlers --

/// GET /orders/{id}: the order as the ledger currently has it.
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state.coordinator.get_order(order_id).await?;
    Ok(Json(OrderResponse::from_order(order_id.to_string(), &order)))
}

/// POST /orders/{id}/confirm: freeze delivery details and get the payment link.
#[tracing::instrument(skip(state, delivery))]
pub async fn confirm<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(delivery): Json<DeliveryInfo>,
) -> Result<Json<PaymentRedirectResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let redirect_url = state
        .coordinator
        .confirm_checkout(order_id, delivery)
        .await?;

    Ok(Json(PaymentRedirectResponse {
        order_id: order_id.to_string(),
        redirect_url,
    }))
}

/// POST /orders/{id}/payment/check: the user's "I paid" button.
#[tracing::instrument(skip(state))]
pub async fn check_payment<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderStateResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order_state = state.coordinator.check_payment_status(order_id).await?;

    Ok(Json(OrderStateResponse {
        order_id: order_id.to_string(),
        state: order_state,
    }))
}

/// POST /orders/{id}/cancel: cancel on behalf of the owner or an administrator.
#[tracing::instrument(skip(state, req))]
pub async fn cancel<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<CancelOrderRequest>,
) -> Result<Json<OrderStateResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let reason = req.reason.as_deref().unwrap_or("cancelled on request");
    let order_state = state
        .coordinator
        .cancel_order(order_id, req.actor(), reason)
        .await?;

    Ok(Json(OrderStateResponse {
        order_id: order_id.to_string(),
        state: order_state,
    }))
}
