//! HTTP API for order reconciliation.
//!
//! Exposes checkout, payment verification, cancellation and order listings
//! over REST, runs the background reconciliation sweep, and reports through
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use projections::{Projection, ProjectionProcessor, ReconciliationQueue, UserOrdersView};
use reconciliation::{ReconciliationConfig, Sweeper, TracingNotifier};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use routes::{AppCoordinator, AppState, Backends};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/users/{user_id}/checkout", post(routes::users::checkout::<S>))
        .route("/users/{user_id}/orders", get(routes::users::orders::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/confirm", post(routes::orders::confirm::<S>))
        .route(
            "/orders/{id}/payment/check",
            post(routes::orders::check_payment::<S>),
        )
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route(
            "/payments/notifications",
            post(routes::payments::notification::<S>),
        )
        .route("/admin/orders", get(routes::admin::recent_orders::<S>))
        .route(
            "/admin/reconciliation",
            get(routes::admin::due_orders::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the coordinator to in-memory external systems and registers the
/// read models with a projection processor.
pub fn create_default_state<S: EventStore + Clone + 'static>(
    event_store: S,
    config: ReconciliationConfig,
) -> Arc<AppState<S>> {
    create_state(event_store, config, Backends::default())
}

/// Like [`create_default_state`], but over caller-provided backends.
pub fn create_state<S: EventStore + Clone + 'static>(
    event_store: S,
    config: ReconciliationConfig,
    backends: Backends,
) -> Arc<AppState<S>> {
    let coordinator = AppCoordinator::new(
        event_store.clone(),
        backends.catalog.clone(),
        backends.carts.clone(),
        backends.processor.clone(),
        backends.commerce.clone(),
        TracingNotifier,
        config,
    );

    let user_orders = UserOrdersView::new();
    let queue = ReconciliationQueue::new();

    let mut processor = ProjectionProcessor::new(event_store);
    processor.register(Box::new(user_orders.clone()) as Box<dyn Projection>);
    processor.register(Box::new(queue.clone()) as Box<dyn Projection>);

    Arc::new(AppState {
        coordinator: Arc::new(coordinator),
        projection_processor: Arc::new(processor),
        user_orders,
        queue,
        backends,
    })
}

/// Sweeper sharing the state's coordinator, processor and queue.
pub fn create_sweeper<S: EventStore + Clone + 'static>(
    state: &Arc<AppState<S>>,
) -> Sweeper<S, AppCoordinator<S>> {
    Sweeper::new(
        state.coordinator.clone(),
        state.projection_processor.clone(),
        state.queue.clone(),
    )
}
