//! Order aggregate, its lifecycle and the ledger that guards it.

mod aggregate;
mod events;
mod ledger;
mod payment;
mod state;
mod transition;
mod value_objects;

pub use aggregate::{Cancellation, Order};
pub use events::{
    AwaitingPaymentData, OrderCancelledData, OrderCreatedData, OrderEvent, OrderFailedData,
    OrderSyncedData, PaymentCheckedData, PaymentRequestedData, PaymentSettledData,
    RemoteCompensatedData, RemoteOrderLinkedData, RemoteSyncClaimedData, RemoteSyncReleasedData,
};
pub use ledger::{CreatedOrder, OrderLedger};
pub use payment::{PaymentLabel, PaymentRecord, PaymentStatus};
pub use state::OrderState;
pub use transition::Transition;
pub use value_objects::{
    Actor, CartLine, CartSnapshot, DeliveryInfo, Money, OrderLine, ProductId, RemoteCustomerId,
    RemoteLink, RemoteOrderId, UserId,
};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Rejections produced by the order aggregate.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order already created")]
    AlreadyCreated,

    #[error("Order does not exist")]
    NotCreated,

    #[error("Order has no lines")]
    NoLines,

    #[error("Invalid quantity for product {product_id}")]
    InvalidQuantity { product_id: String },

    #[error("Order total overflows")]
    TotalOverflow,

    #[error("Stated total {stated} does not match computed total {computed}")]
    TotalMismatch { stated: Money, computed: Money },

    /// The caller's view of the order is out of date.
    #[error("Stale state: expected {expected}, found {actual}")]
    StaleState {
        expected: OrderState,
        actual: OrderState,
    },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: OrderState, to: OrderState },

    #[error("Cannot {action} in {state} state")]
    NotAllowed {
        state: OrderState,
        action: &'static str,
    },

    #[error("Payment already requested")]
    PaymentAlreadyRequested,

    #[error("Payment not requested yet")]
    PaymentNotRequested,

    #[error("Invalid delivery info: {0}")]
    InvalidDelivery(String),

    #[error("Settled amount {actual} does not match order total {expected}")]
    AmountMismatch { expected: Money, actual: Money },

    #[error("Remote sync already claimed at {claimed_at}")]
    SyncInProgress { claimed_at: DateTime<Utc> },

    #[error("Order already linked to a remote order")]
    AlreadyLinked,

    #[error("Order is not linked to a remote order")]
    NotLinked,

    #[error("No remote compensation pending")]
    CompensationNotPending,
}
