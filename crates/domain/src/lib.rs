//! Order Ledger for the storefront reconciliation service.
//!
//! - [`Aggregate`] / [`DomainEvent`]: event-sourced entities
//! - [`CommandHandler`]: load, decide, append with the loaded version
//! - [`order`]: the order aggregate, its lifecycle table and [`OrderLedger`]
//! - [`checkout`]: the duplicate-submission guard
//! - [`customer`]: the once-only local user to remote customer mapping

pub mod aggregate;
pub mod checkout;
pub mod command;
pub mod customer;
pub mod error;
pub mod order;

pub use aggregate::{Aggregate, DomainEvent};
pub use checkout::{CheckoutGuard, CheckoutToken, GuardError};
pub use command::{CommandHandler, CommandResult};
pub use customer::{CustomerDirectory, CustomerError, CustomerLink};
pub use error::DomainError;
pub use order::{
    Actor, Cancellation, CartLine, CartSnapshot, CreatedOrder, DeliveryInfo, Money, Order,
    OrderError, OrderEvent, OrderLedger, OrderLine, OrderState, PaymentLabel, PaymentRecord,
    PaymentStatus, ProductId, RemoteCustomerId, RemoteLink, RemoteOrderId, Transition, UserId,
};
