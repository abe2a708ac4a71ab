//! Order domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{
    Actor, DeliveryInfo, Money, OrderLine, PaymentLabel, PaymentStatus, RemoteCustomerId,
    RemoteOrderId, UserId,
};

/// Facts recorded on an order stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Snapshot frozen; order is `pending`.
    OrderCreated(OrderCreatedData),

    /// Delivery details frozen and a payment label reserved.
    PaymentRequested(PaymentRequestedData),

    /// The processor accepted the payable request; order is `awaiting_payment`.
    AwaitingPayment(AwaitingPaymentData),

    /// A settlement lookup was made. Does not change state.
    PaymentChecked(PaymentCheckedData),

    /// Settlement confirmed; order is `paid`.
    PaymentSettled(PaymentSettledData),

    RemoteSyncClaimed(RemoteSyncClaimedData),

    RemoteSyncReleased(RemoteSyncReleasedData),

    /// The commerce system holds a copy of the order.
    RemoteOrderLinked(RemoteOrderLinkedData),

    /// Order is `synced`.
    OrderSynced(OrderSyncedData),

    /// Order is `failed`.
    OrderFailed(OrderFailedData),

    /// Order is `cancelled`.
    OrderCancelled(OrderCancelledData),

    /// The remote copy was marked cancelled.
    RemoteCompensated(RemoteCompensatedData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "OrderCreated",
            OrderEvent::PaymentRequested(_) => "PaymentRequested",
            OrderEvent::AwaitingPayment(_) => "AwaitingPayment",
            OrderEvent::PaymentChecked(_) => "PaymentChecked",
            OrderEvent::PaymentSettled(_) => "PaymentSettled",
            OrderEvent::RemoteSyncClaimed(_) => "RemoteSyncClaimed",
            OrderEvent::RemoteSyncReleased(_) => "RemoteSyncReleased",
            OrderEvent::RemoteOrderLinked(_) => "RemoteOrderLinked",
            OrderEvent::OrderSynced(_) => "OrderSynced",
            OrderEvent::OrderFailed(_) => "OrderFailed",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
            OrderEvent::RemoteCompensated(_) => "RemoteCompensated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub total_amount: Money,
    /// Checkout guard stream that admitted this order.
    pub checkout_key: AggregateId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequestedData {
    pub label: PaymentLabel,
    pub amount: Money,
    pub delivery: DeliveryInfo,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwaitingPaymentData {
    pub redirect_url: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCheckedData {
    pub status: PaymentStatus,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSettledData {
    pub amount: Money,
    /// When the processor says the money moved.
    pub settled_at: DateTime<Utc>,
    /// When this service observed it.
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSyncClaimedData {
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSyncReleasedData {
    pub reason: String,
    pub released_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteOrderLinkedData {
    pub remote_order_id: RemoteOrderId,
    pub remote_customer_id: RemoteCustomerId,
    pub linked_at: DateTime<Utc>,
    /// Set when the order was cancelled before the link landed; the remote
    /// copy then has to be cancelled too.
    #[serde(default)]
    pub compensation_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSyncedData {
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFailedData {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub actor: Actor,
    pub reason: String,
    /// A remote copy exists and has to be marked cancelled.
    pub compensation_required: bool,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCompensatedData {
    pub remote_order_id: RemoteOrderId,
    pub compensated_at: DateTime<Utc>,
}

impl OrderEvent {
    /// Order id carried by creation events, for read models that start a row.
    pub fn created_order_id(&self) -> Option<AggregateId> {
        match self {
            OrderEvent::OrderCreated(data) => Some(data.order_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matches_serialized_tag() {
        let event = OrderEvent::OrderFailed(OrderFailedData {
            reason: "payment not received".to_string(),
            failed_at: Utc::now(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
        assert_eq!(json["data"]["reason"], "payment not received");
    }

    #[test]
    fn test_cancellation_records_actor() {
        let event = OrderEvent::OrderCancelled(OrderCancelledData {
            actor: Actor::User(UserId::new(5)),
            reason: "changed mind".to_string(),
            compensation_required: false,
            cancelled_at: Utc::now(),
        });

        let json = serde_json::to_string(&event).unwrap();
        let back: OrderEvent = serde_json::from_str(&json).unwrap();
        match back {
            OrderEvent::OrderCancelled(data) => {
                assert_eq!(data.actor, Actor::User(UserId::new(5)));
                assert!(!data.compensation_required);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
