//! Read model views over order streams.

pub mod reconciliation_queue;
pub mod user_orders;

pub use reconciliation_queue::{DueAction, DueOrder, ReconciliationQueue};
pub use user_orders::{OrderSummary, UserOrdersView};
