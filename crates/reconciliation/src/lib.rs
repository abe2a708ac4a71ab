//! Order reconciliation for the chat storefront.
//!
//! Turns a cart into an order, drives it through payment and records the
//! paid order in the commerce system exactly once:
//!
//! 1. [`CartSnapshotBuilder`] prices the cart against the catalog
//! 2. [`PaymentOrchestrator`] requests and verifies payment by label
//! 3. [`CommerceSyncAgent`] creates the remote customer and order
//! 4. [`ReconciliationCoordinator`] chains the steps and handles cancellation
//! 5. [`Sweeper`] periodically re-drives orders that are waiting on someone
//!
//! External systems sit behind the traits in [`services`].

pub mod config;
pub mod coordinator;
pub mod error;
pub mod orchestrator;
pub mod services;
pub mod snapshot;
pub mod sweep;
pub mod sync;

pub use config::{PollPolicy, ReconciliationConfig};
pub use coordinator::{CheckoutStarted, ReconciliationCoordinator, Reconciler};
pub use error::{ReconciliationError, Result, UnavailableLine, UnavailableReason};
pub use orchestrator::{PaymentOrchestrator, PaymentVerification};
pub use services::{
    CartStore, Catalog, CommerceSystem, CustomerProfile, InMemoryCartStore, InMemoryCatalog,
    InMemoryCommerceSystem, InMemoryNotifier, InMemoryPaymentProcessor, Notification,
    NotificationKind, Notifier, PaymentProcessor, ProductQuote, Recipient, RemoteOrderLine,
    RemoteOrderRequest, RemoteOrderStatus, Settlement, SettlementStatus, ShippingMethod,
    TracingNotifier,
};
pub use snapshot::CartSnapshotBuilder;
pub use sweep::{SweepReport, Sweeper};
pub use sync::CommerceSyncAgent;
