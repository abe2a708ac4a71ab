//! Read models over the order ledger.
//!
//! - [`Projection`] folds stored events into a view and remembers the last
//!   store [`Position`](event_store::Position) it saw
//! - [`ProjectionProcessor`] catches registered projections up with the store
//! - [`ReconciliationQueue`] lists orders the background sweep has to revisit
//! - [`UserOrdersView`] backs the order history and admin listings

pub mod error;
pub mod processor;
pub mod projection;
pub mod read_model;
pub mod views;

pub use error::{ProjectionError, Result};
pub use processor::ProjectionProcessor;
pub use projection::{Checkpoint, Projection};
pub use read_model::ReadModel;
pub use views::{DueAction, DueOrder, OrderSummary, ReconciliationQueue, UserOrdersView};
