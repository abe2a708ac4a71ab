//! External collaborators and their in-memory implementations.
//!
//! The in-memory versions back the tests and local runs. Each records the
//! calls it receives and can be told to fail, so tests can assert how often
//! the outside world was contacted.

pub mod cart;
pub mod catalog;
pub mod commerce;
pub mod notifier;
pub mod payment;

use std::future::Future;
use std::time::Duration;

pub use cart::{CartStore, InMemoryCartStore};
pub use catalog::{Catalog, InMemoryCatalog, ProductQuote};
pub use commerce::{
    CommerceSystem, CustomerProfile, InMemoryCommerceSystem, RemoteOrderLine, RemoteOrderRequest,
    RemoteOrderStatus, ShippingMethod,
};
pub use notifier::{
    InMemoryNotifier, Notification, NotificationKind, Notifier, Recipient, TracingNotifier,
};
pub use payment::{InMemoryPaymentProcessor, PaymentProcessor, Settlement, SettlementStatus};

use crate::error::{ReconciliationError, Result};

/// Runs an external call under `limit`. Elapsing is reported through `on_timeout`.
pub(crate) async fn call_with_timeout<T, F>(
    limit: Duration,
    call: &'static str,
    fut: F,
    on_timeout: impl FnOnce(String) -> ReconciliationError,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(call, timeout_ms = limit.as_millis() as u64, "external call timed out");
            metrics::counter!("external_call_timeouts_total", "call" => call).increment(1);
            Err(on_timeout(format!("{call} timed out after {}ms", limit.as_millis())))
        }
    }
}

/// Locks an in-memory collaborator's state, ignoring poisoning from a panicked test.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
