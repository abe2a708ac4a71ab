//! Payment processor callbacks.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use domain::OrderState;
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct PaymentNotification {
    pub label: String,
}

#[derive(Serialize)]
pub struct NotificationAck {
    pub label: String,
    pub state: OrderState,
}

/// POST /payments/notifications: the processor reports activity on a label.
///
/// The body is only a hint: the settlement is always re-read from the
/// processor before the order moves.
#[tracing::instrument(skip(state, notification))]
pub async fn notification<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(notification): Json<PaymentNotification>,
) -> Result<Json<NotificationAck>, ApiError> {
    if notification.label.trim().is_empty() {
        return Err(ApiError::BadRequest("label must not be empty".to_string()));
    }

    tracing::info!(label = %notification.label, "payment notification received");
    let order_state = state
        .coordinator
        .handle_payment_notification(&notification.label)
        .await?;

    Ok(Json(NotificationAck {
        label: notification.label,
        state: order_state,
    }))
}
