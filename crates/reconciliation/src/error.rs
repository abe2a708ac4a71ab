//! Reconciliation error types.

use common::AggregateId;
use domain::{DomainError, Money, OrderError, OrderState, ProductId, UserId};
use projections::ProjectionError;
use thiserror::Error;

/// Why a cart line cannot be bought right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    UnknownProduct,
    NotPurchasable,
    QuantityAboveCap { requested: u32, available: u32 },
    InvalidQuantity,
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnavailableReason::UnknownProduct => write!(f, "unknown product"),
            UnavailableReason::NotPurchasable => write!(f, "not available for purchase"),
            UnavailableReason::QuantityAboveCap {
                requested,
                available,
            } => write!(f, "requested {requested}, only {available} available"),
            UnavailableReason::InvalidQuantity => write!(f, "quantity must be at least 1"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnavailableLine {
    pub product_id: ProductId,
    pub reason: UnavailableReason,
}

#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("Cart of user {0} is empty")]
    EmptyCart(UserId),

    /// Every offending line, never just the first.
    #[error("{} cart line(s) unavailable", lines.len())]
    UnavailableItem { lines: Vec<UnavailableLine> },

    #[error("Cart total overflows")]
    AmountOverflow,

    /// Another actor changed the order first. Callers re-read rather than retry blindly.
    #[error("Stale state: {0}")]
    StaleState(String),

    #[error("Order {order_id} is {state}: {reason}")]
    InvalidState {
        order_id: AggregateId,
        state: OrderState,
        reason: &'static str,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(AggregateId),

    /// The actor claims a role it does not have.
    #[error("Not permitted: {0}")]
    Forbidden(String),

    #[error("Invalid delivery info: {0}")]
    InvalidDelivery(String),

    /// The processor was unreachable, refused the call or timed out.
    #[error("Payment request failed: {0}")]
    PaymentRequest(String),

    #[error("Order {order_id} settled for {reported}, expected {expected}")]
    PaymentAmountMismatch {
        order_id: AggregateId,
        expected: Money,
        reported: Money,
    },

    #[error("No order for payment label {0}")]
    UnknownPaymentLabel(String),

    /// The commerce system was unreachable, refused the call or timed out.
    #[error("Remote sync failed: {0}")]
    RemoteSync(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Cart store error: {0}")]
    CartStore(String),

    #[error("Notification failed: {0}")]
    Notifier(String),

    #[error("Domain error: {0}")]
    Domain(DomainError),

    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),
}

impl ReconciliationError {
    pub fn is_stale(&self) -> bool {
        matches!(self, ReconciliationError::StaleState(_))
    }

    /// Failures of an external call that a later attempt may get past.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReconciliationError::PaymentRequest(_)
                | ReconciliationError::RemoteSync(_)
                | ReconciliationError::Catalog(_)
                | ReconciliationError::CartStore(_)
                | ReconciliationError::StaleState(_)
        )
    }
}

impl From<DomainError> for ReconciliationError {
    fn from(err: DomainError) -> Self {
        if err.is_stale() {
            return ReconciliationError::StaleState(err.to_string());
        }
        match err {
            DomainError::OrderNotFound(id) => ReconciliationError::OrderNotFound(id),
            DomainError::Order(OrderError::InvalidDelivery(msg)) => {
                ReconciliationError::InvalidDelivery(msg)
            }
            DomainError::Order(OrderError::TotalOverflow) => ReconciliationError::AmountOverflow,
            other => ReconciliationError::Domain(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconciliationError>;
