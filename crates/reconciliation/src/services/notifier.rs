//! User and admin notifications.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::AggregateId;
use domain::UserId;
use serde::Serialize;

use super::lock;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    User(UserId),
    Admin(UserId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PaymentReceived,
    OrderSynced,
    PaymentExpired,
    /// Settled for a different amount than the order total.
    AmountMismatch,
    /// The processor refused or could not classify the payment.
    PaymentUnresolved,
    /// Settlement arrived for an order that already failed or was cancelled.
    LatePayment,
    OrderCancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub recipient: Recipient,
    pub order_id: AggregateId,
    pub kind: NotificationKind,
    pub message: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        tracing::info!(
            recipient = ?notification.recipient,
            order_id = %notification.order_id,
            kind = ?notification.kind,
            message = %notification.message,
            "notification"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        lock(&self.sent).clone()
    }

    pub fn count_of(&self, kind: NotificationKind) -> usize {
        lock(&self.sent).iter().filter(|n| n.kind == kind).count()
    }

    pub fn sent_to(&self, recipient: Recipient) -> Vec<Notification> {
        lock(&self.sent)
            .iter()
            .filter(|n| n.recipient == recipient)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        lock(&self.sent).push(notification);
        Ok(())
    }
}
