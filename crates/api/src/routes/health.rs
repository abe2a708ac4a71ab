//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use event_store::EventStore;
use projections::ReadModel;
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Orders the sweep still has to revisit, as of the last catch-up.
    pub pending_reconciliations: usize,
}

/// GET /health: returns system health status.
pub async fn check<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    let pending = state.queue.count();
    metrics::gauge!("reconciliation_queue_depth").set(pending as f64);
    Json(HealthResponse {
        status: "ok",
        pending_reconciliations: pending,
    })
}
