//! Order aggregate implementation.

use chrono::{DateTime, Duration, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{
    Actor, CartSnapshot, DeliveryInfo, Money, OrderError, OrderEvent, OrderLine, OrderState,
    PaymentLabel, PaymentRecord, PaymentStatus, RemoteCustomerId, RemoteLink, RemoteOrderId,
    Transition, UserId,
    events::{
        AwaitingPaymentData, OrderCancelledData, OrderCreatedData, OrderFailedData,
        OrderSyncedData, PaymentCheckedData, PaymentRequestedData, PaymentSettledData,
        RemoteCompensatedData, RemoteOrderLinkedData, RemoteSyncClaimedData,
        RemoteSyncReleasedData,
    },
};

/// How and by whom an order was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub actor: Actor,
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
    pub compensation_required: bool,
    pub compensated_at: Option<DateTime<Utc>>,
}

/// Order aggregate root.
///
/// Lines and total are frozen by `OrderCreated` and never change. Every
/// later event either moves the state along the lifecycle table or records
/// bookkeeping (payment checks, sync claims, remote links) without moving it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    user_id: Option<UserId>,
    lines: Vec<OrderLine>,
    total_amount: Money,
    checkout_key: Option<AggregateId>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,

    state: OrderState,
    delivery: Option<DeliveryInfo>,
    payment: Option<PaymentRecord>,
    sync_claimed_at: Option<DateTime<Utc>>,
    remote_link: Option<RemoteLink>,
    cancellation: Option<Cancellation>,
    failure_reason: Option<String>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::OrderCreated(data) => {
                self.id = Some(data.order_id);
                self.user_id = Some(data.user_id);
                self.lines = data.lines;
                self.total_amount = data.total_amount;
                self.checkout_key = Some(data.checkout_key);
                self.created_at = Some(data.created_at);
                self.updated_at = Some(data.created_at);
                self.state = OrderState::Pending;
            }
            OrderEvent::PaymentRequested(data) => {
                self.delivery = Some(data.delivery);
                self.payment = Some(PaymentRecord::new(
                    data.label,
                    data.amount,
                    data.requested_at,
                ));
                self.updated_at = Some(data.requested_at);
            }
            OrderEvent::AwaitingPayment(data) => {
                if let Some(payment) = self.payment.as_mut() {
                    payment.redirect_url = Some(data.redirect_url);
                }
                self.state = OrderState::AwaitingPayment;
                self.updated_at = Some(data.at);
            }
            OrderEvent::PaymentChecked(data) => {
                if let Some(payment) = self.payment.as_mut() {
                    payment.status = data.status;
                    payment.last_checked_at = Some(data.checked_at);
                    payment.check_count += 1;
                }
            }
            OrderEvent::PaymentSettled(data) => {
                if let Some(payment) = self.payment.as_mut() {
                    payment.status = PaymentStatus::Success;
                    payment.settled_amount = Some(data.amount);
                    payment.settled_at = Some(data.settled_at);
                }
                self.state = OrderState::Paid;
                self.updated_at = Some(data.confirmed_at);
            }
            OrderEvent::RemoteSyncClaimed(data) => {
                self.sync_claimed_at = Some(data.claimed_at);
            }
            OrderEvent::RemoteSyncReleased(_) => {
                self.sync_claimed_at = None;
            }
            OrderEvent::RemoteOrderLinked(data) => {
                self.sync_claimed_at = None;
                if data.compensation_required
                    && let Some(cancellation) = self.cancellation.as_mut()
                {
                    cancellation.compensation_required = true;
                }
                self.remote_link = Some(RemoteLink {
                    remote_order_id: data.remote_order_id,
                    remote_customer_id: data.remote_customer_id,
                    linked_at: data.linked_at,
                });
                self.updated_at = Some(data.linked_at);
            }
            OrderEvent::OrderSynced(data) => {
                self.state = OrderState::Synced;
                self.updated_at = Some(data.synced_at);
            }
            OrderEvent::OrderFailed(data) => {
                self.state = OrderState::Failed;
                self.failure_reason = Some(data.reason);
                self.updated_at = Some(data.failed_at);
            }
            OrderEvent::OrderCancelled(data) => {
                self.state = OrderState::Cancelled;
                self.cancellation = Some(Cancellation {
                    actor: data.actor,
                    reason: data.reason,
                    cancelled_at: data.cancelled_at,
                    compensation_required: data.compensation_required,
                    compensated_at: None,
                });
                self.updated_at = Some(data.cancelled_at);
            }
            OrderEvent::RemoteCompensated(data) => {
                if let Some(cancellation) = self.cancellation.as_mut() {
                    cancellation.compensated_at = Some(data.compensated_at);
                }
                self.updated_at = Some(data.compensated_at);
            }
        }
    }
}

// Query methods
impl Order {
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn checkout_key(&self) -> Option<AggregateId> {
        self.checkout_key
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn delivery(&self) -> Option<&DeliveryInfo> {
        self.delivery.as_ref()
    }

    pub fn payment(&self) -> Option<&PaymentRecord> {
        self.payment.as_ref()
    }

    pub fn remote_link(&self) -> Option<&RemoteLink> {
        self.remote_link.as_ref()
    }

    pub fn sync_claimed_at(&self) -> Option<DateTime<Utc>> {
        self.sync_claimed_at
    }

    pub fn cancellation(&self) -> Option<&Cancellation> {
        self.cancellation.as_ref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Cancelled after a remote copy was created, and that copy is not yet
    /// marked cancelled.
    pub fn needs_compensation(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|c| c.compensation_required && c.compensated_at.is_none())
    }
}

// Command methods
impl Order {
    pub fn create(
        &self,
        order_id: AggregateId,
        snapshot: &CartSnapshot,
        checkout_key: AggregateId,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyCreated);
        }
        if snapshot.lines.is_empty() {
            return Err(OrderError::NoLines);
        }
        if let Some(line) = snapshot.lines.iter().find(|l| l.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                product_id: line.product_id.to_string(),
            });
        }
        let recomputed = CartSnapshot::new(snapshot.user_id, snapshot.lines.clone())
            .map(|s| s.total_amount)
            .ok_or(OrderError::TotalOverflow)?;
        if recomputed != snapshot.total_amount {
            return Err(OrderError::TotalMismatch {
                stated: snapshot.total_amount,
                computed: recomputed,
            });
        }

        Ok(vec![OrderEvent::OrderCreated(OrderCreatedData {
            order_id,
            user_id: snapshot.user_id,
            lines: snapshot.lines.clone(),
            total_amount: snapshot.total_amount,
            checkout_key,
            created_at: now,
        })])
    }

    pub fn request_payment(
        &self,
        label: PaymentLabel,
        delivery: DeliveryInfo,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        self.ensure_state(OrderState::Pending, "request payment")?;
        if self.payment.is_some() {
            return Err(OrderError::PaymentAlreadyRequested);
        }
        delivery.validate().map_err(OrderError::InvalidDelivery)?;

        Ok(vec![OrderEvent::PaymentRequested(PaymentRequestedData {
            label,
            amount: self.total_amount,
            delivery,
            requested_at: now,
        })])
    }

    pub fn record_payment_check(
        &self,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        if self.payment.is_none() {
            return Err(OrderError::PaymentNotRequested);
        }

        Ok(vec![OrderEvent::PaymentChecked(PaymentCheckedData {
            status,
            checked_at: now,
        })])
    }

    /// Takes the right to create the remote order for `lease`.
    pub fn claim_remote_sync(
        &self,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        if self.remote_link.is_some() {
            return Err(OrderError::AlreadyLinked);
        }
        self.ensure_state(OrderState::Paid, "sync to the commerce system")?;
        if let Some(claimed_at) = self.sync_claimed_at
            && now - claimed_at < lease
        {
            return Err(OrderError::SyncInProgress { claimed_at });
        }

        Ok(vec![OrderEvent::RemoteSyncClaimed(RemoteSyncClaimedData {
            claimed_at: now,
        })])
    }

    /// Gives the claim back early after a failed remote call.
    pub fn release_remote_sync(
        &self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        if self.sync_claimed_at.is_none() {
            return Ok(vec![]);
        }

        Ok(vec![OrderEvent::RemoteSyncReleased(
            RemoteSyncReleasedData {
                reason: reason.into(),
                released_at: now,
            },
        )])
    }

    /// Records the remote copy of the order.
    ///
    /// A paid order that was cancelled while its remote copy was being
    /// created still gets the link, flagged for compensation.
    pub fn link_remote_order(
        &self,
        remote_order_id: RemoteOrderId,
        remote_customer_id: RemoteCustomerId,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        if self.remote_link.is_some() {
            return Err(OrderError::AlreadyLinked);
        }
        let cancelled_after_payment = self.state == OrderState::Cancelled
            && self
                .payment
                .as_ref()
                .is_some_and(|p| p.settled_amount.is_some());
        if !cancelled_after_payment {
            self.ensure_state(OrderState::Paid, "link a remote order")?;
        }

        Ok(vec![OrderEvent::RemoteOrderLinked(RemoteOrderLinkedData {
            remote_order_id,
            remote_customer_id,
            linked_at: now,
            compensation_required: cancelled_after_payment,
        })])
    }

    pub fn record_compensation(&self, now: DateTime<Utc>) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        let Some(link) = self.remote_link.as_ref() else {
            return Err(OrderError::CompensationNotPending);
        };
        if !self.needs_compensation() {
            return Err(OrderError::CompensationNotPending);
        }

        Ok(vec![OrderEvent::RemoteCompensated(RemoteCompensatedData {
            remote_order_id: link.remote_order_id.clone(),
            compensated_at: now,
        })])
    }

    /// Compare-and-set state change: applies only if the order is in `from`.
    pub fn transition(
        &self,
        from: OrderState,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        if self.state != from {
            return Err(OrderError::StaleState {
                expected: from,
                actual: self.state,
            });
        }
        let to = transition.target();
        if !from.can_transition_to(to) {
            return Err(OrderError::InvalidTransition { from, to });
        }

        let event = match transition {
            Transition::AwaitPayment { redirect_url } => {
                if self.payment.is_none() {
                    return Err(OrderError::PaymentNotRequested);
                }
                OrderEvent::AwaitingPayment(AwaitingPaymentData {
                    redirect_url: redirect_url.clone(),
                    at: now,
                })
            }
            Transition::MarkPaid { amount, settled_at } => {
                if self.payment.is_none() {
                    return Err(OrderError::PaymentNotRequested);
                }
                if *amount != self.total_amount {
                    return Err(OrderError::AmountMismatch {
                        expected: self.total_amount,
                        actual: *amount,
                    });
                }
                OrderEvent::PaymentSettled(PaymentSettledData {
                    amount: *amount,
                    settled_at: *settled_at,
                    confirmed_at: now,
                })
            }
            Transition::MarkSynced => {
                if self.remote_link.is_none() {
                    return Err(OrderError::NotLinked);
                }
                OrderEvent::OrderSynced(OrderSyncedData { synced_at: now })
            }
            Transition::Fail { reason } => OrderEvent::OrderFailed(OrderFailedData {
                reason: reason.clone(),
                failed_at: now,
            }),
            Transition::Cancel { actor, reason } => {
                OrderEvent::OrderCancelled(OrderCancelledData {
                    actor: *actor,
                    reason: reason.clone(),
                    compensation_required: self.remote_link.is_some(),
                    cancelled_at: now,
                })
            }
        };

        Ok(vec![event])
    }

    fn ensure_created(&self) -> Result<(), OrderError> {
        if self.id.is_none() {
            return Err(OrderError::NotCreated);
        }
        Ok(())
    }

    fn ensure_state(&self, expected: OrderState, action: &'static str) -> Result<(), OrderError> {
        if self.state != expected {
            return Err(OrderError::NotAllowed {
                state: self.state,
                action,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::order::ProductId;

    fn snapshot(quantity: u32, price: i64) -> CartSnapshot {
        CartSnapshot::new(
            UserId::new(42),
            vec![OrderLine {
                product_id: ProductId::new("A"),
                name: "Tea".to_string(),
                model: "T-1".to_string(),
                quantity,
                unit_price: Money::from_minor_units(price),
                options: BTreeMap::new(),
            }],
        )
        .unwrap()
    }

    fn delivery() -> DeliveryInfo {
        DeliveryInfo {
            full_name: "Ivan Ivanov".to_string(),
            phone: "+79991234567".to_string(),
            email: None,
            address: Some("Lenina 1".to_string()),
            comment: None,
        }
    }

    fn run(order: &mut Order, events: Vec<OrderEvent>) {
        order.apply_events(events);
    }

    fn created() -> Order {
        let mut order = Order::default();
        let events = order
            .create(AggregateId::new(), &snapshot(2, 100), AggregateId::new(), Utc::now())
            .unwrap();
        run(&mut order, events);
        order
    }

    fn awaiting() -> Order {
        let mut order = created();
        let label = PaymentLabel::generate(order.id().unwrap());
        let events = order.request_payment(label, delivery(), Utc::now()).unwrap();
        run(&mut order, events);
        let events = order
            .transition(
                OrderState::Pending,
                &Transition::AwaitPayment {
                    redirect_url: "https://pay.example/1".to_string(),
                },
                Utc::now(),
            )
            .unwrap();
        run(&mut order, events);
        order
    }

    fn paid() -> Order {
        let mut order = awaiting();
        let events = order
            .transition(
                OrderState::AwaitingPayment,
                &Transition::MarkPaid {
                    amount: Money::from_minor_units(200),
                    settled_at: Utc::now(),
                },
                Utc::now(),
            )
            .unwrap();
        run(&mut order, events);
        order
    }

    fn linked() -> Order {
        let mut order = paid();
        let events = order
            .link_remote_order(
                RemoteOrderId::new("r-1"),
                RemoteCustomerId::new("c-1"),
                Utc::now(),
            )
            .unwrap();
        run(&mut order, events);
        order
    }

    #[test]
    fn test_create_freezes_lines_and_total() {
        let order = created();
        assert_eq!(order.state(), OrderState::Pending);
        assert_eq!(order.total_amount(), Money::from_minor_units(200));
        assert_eq!(order.lines().len(), 1);
        assert_eq!(order.user_id(), Some(UserId::new(42)));
    }

    #[test]
    fn test_create_twice_is_rejected() {
        let order = created();
        let result = order.create(
            AggregateId::new(),
            &snapshot(1, 100),
            AggregateId::new(),
            Utc::now(),
        );
        assert!(matches!(result, Err(OrderError::AlreadyCreated)));
    }

    #[test]
    fn test_create_rejects_tampered_total() {
        let mut tampered = snapshot(2, 100);
        tampered.total_amount = Money::from_minor_units(1);
        let result =
            Order::default().create(AggregateId::new(), &tampered, AggregateId::new(), Utc::now());
        assert!(matches!(result, Err(OrderError::TotalMismatch { .. })));
    }

    #[test]
    fn test_stale_from_state_is_reported() {
        let order = awaiting();
        let result = order.transition(
            OrderState::Pending,
            &Transition::AwaitPayment {
                redirect_url: "x".to_string(),
            },
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(OrderError::StaleState {
                expected: OrderState::Pending,
                actual: OrderState::AwaitingPayment
            })
        ));
    }

    #[test]
    fn test_transition_outside_table_is_rejected() {
        let order = created();
        let result = order.transition(OrderState::Pending, &Transition::MarkSynced, Utc::now());
        assert!(matches!(
            result,
            Err(OrderError::InvalidTransition {
                from: OrderState::Pending,
                to: OrderState::Synced
            })
        ));

        let result = order.transition(
            OrderState::Pending,
            &Transition::Fail {
                reason: "x".to_string(),
            },
            Utc::now(),
        );
        assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));
    }

    #[test]
    fn test_await_payment_requires_recorded_request() {
        let order = created();
        let result = order.transition(
            OrderState::Pending,
            &Transition::AwaitPayment {
                redirect_url: "x".to_string(),
            },
            Utc::now(),
        );
        assert!(matches!(result, Err(OrderError::PaymentNotRequested)));
    }

    #[test]
    fn test_mark_paid_checks_amount() {
        let order = awaiting();
        let result = order.transition(
            OrderState::AwaitingPayment,
            &Transition::MarkPaid {
                amount: Money::from_minor_units(150),
                settled_at: Utc::now(),
            },
            Utc::now(),
        );
        assert!(matches!(result, Err(OrderError::AmountMismatch { .. })));
    }

    #[test]
    fn test_paid_order_keeps_total_and_records_settlement() {
        let order = paid();
        assert_eq!(order.state(), OrderState::Paid);
        assert_eq!(order.total_amount(), Money::from_minor_units(200));
        let payment = order.payment().unwrap();
        assert_eq!(payment.status, PaymentStatus::Success);
        assert_eq!(payment.settled_amount, Some(Money::from_minor_units(200)));
    }

    #[test]
    fn test_payment_checks_count_without_moving_state() {
        let mut order = awaiting();
        for _ in 0..3 {
            let events = order
                .record_payment_check(PaymentStatus::Pending, Utc::now())
                .unwrap();
            run(&mut order, events);
        }
        assert_eq!(order.state(), OrderState::AwaitingPayment);
        assert_eq!(order.payment().unwrap().check_count, 3);
        assert!(order.payment().unwrap().last_checked_at.is_some());
    }

    #[test]
    fn test_sync_claim_blocks_until_lease_expires() {
        let mut order = paid();
        let now = Utc::now();
        let events = order.claim_remote_sync(Duration::seconds(60), now).unwrap();
        run(&mut order, events);

        let again = order.claim_remote_sync(Duration::seconds(60), now + Duration::seconds(10));
        assert!(matches!(again, Err(OrderError::SyncInProgress { .. })));

        let later = order.claim_remote_sync(Duration::seconds(60), now + Duration::seconds(61));
        assert!(later.is_ok());
    }

    #[test]
    fn test_released_claim_can_be_retaken() {
        let mut order = paid();
        let now = Utc::now();
        let events = order.claim_remote_sync(Duration::seconds(60), now).unwrap();
        run(&mut order, events);
        let events = order.release_remote_sync("remote down", now).unwrap();
        run(&mut order, events);

        assert!(order.sync_claimed_at().is_none());
        assert!(order.claim_remote_sync(Duration::seconds(60), now).is_ok());
        assert!(order.release_remote_sync("noop", now).is_ok());
    }

    #[test]
    fn test_remote_link_is_set_once() {
        let order = linked();
        let again = order.link_remote_order(
            RemoteOrderId::new("r-2"),
            RemoteCustomerId::new("c-1"),
            Utc::now(),
        );
        assert!(matches!(again, Err(OrderError::AlreadyLinked)));
        assert_eq!(
            order.remote_link().unwrap().remote_order_id,
            RemoteOrderId::new("r-1")
        );
    }

    #[test]
    fn test_mark_synced_requires_link() {
        let order = paid();
        let result = order.transition(OrderState::Paid, &Transition::MarkSynced, Utc::now());
        assert!(matches!(result, Err(OrderError::NotLinked)));

        let order = linked();
        assert!(
            order
                .transition(OrderState::Paid, &Transition::MarkSynced, Utc::now())
                .is_ok()
        );
    }

    #[test]
    fn test_cancelling_linked_order_requires_compensation_once() {
        let mut order = linked();
        let events = order
            .transition(OrderState::Paid, &Transition::MarkSynced, Utc::now())
            .unwrap();
        run(&mut order, events);

        let events = order
            .transition(
                OrderState::Synced,
                &Transition::Cancel {
                    actor: Actor::Admin(UserId::new(1)),
                    reason: "customer request".to_string(),
                },
                Utc::now(),
            )
            .unwrap();
        run(&mut order, events);
        assert_eq!(order.state(), OrderState::Cancelled);
        assert!(order.needs_compensation());

        let events = order.record_compensation(Utc::now()).unwrap();
        run(&mut order, events);
        assert!(!order.needs_compensation());
        assert!(matches!(
            order.record_compensation(Utc::now()),
            Err(OrderError::CompensationNotPending)
        ));
    }

    #[test]
    fn test_link_after_cancellation_requires_compensation() {
        let mut order = paid();
        let events = order
            .transition(
                OrderState::Paid,
                &Transition::Cancel {
                    actor: Actor::Admin(UserId::new(1)),
                    reason: "refunded".to_string(),
                },
                Utc::now(),
            )
            .unwrap();
        run(&mut order, events);
        assert!(!order.needs_compensation());

        let events = order
            .link_remote_order(
                RemoteOrderId::new("r-9"),
                RemoteCustomerId::new("c-1"),
                Utc::now(),
            )
            .unwrap();
        run(&mut order, events);

        assert_eq!(order.state(), OrderState::Cancelled);
        assert_eq!(
            order.remote_link().unwrap().remote_order_id,
            RemoteOrderId::new("r-9")
        );
        assert!(order.needs_compensation());
    }

    #[test]
    fn test_unpaid_cancelled_order_cannot_be_linked() {
        let mut order = awaiting();
        let events = order
            .transition(
                OrderState::AwaitingPayment,
                &Transition::Cancel {
                    actor: Actor::User(UserId::new(42)),
                    reason: "changed mind".to_string(),
                },
                Utc::now(),
            )
            .unwrap();
        run(&mut order, events);

        let result = order.link_remote_order(
            RemoteOrderId::new("r-9"),
            RemoteCustomerId::new("c-1"),
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(OrderError::NotAllowed {
                state: OrderState::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn test_cancelling_unlinked_order_needs_no_compensation() {
        let mut order = created();
        let events = order
            .transition(
                OrderState::Pending,
                &Transition::Cancel {
                    actor: Actor::User(UserId::new(42)),
                    reason: "changed mind".to_string(),
                },
                Utc::now(),
            )
            .unwrap();
        run(&mut order, events);
        assert_eq!(order.state(), OrderState::Cancelled);
        assert!(!order.needs_compensation());
    }

    #[test]
    fn test_commands_on_missing_order_fail() {
        let order = Order::default();
        assert!(matches!(
            order.record_payment_check(PaymentStatus::Pending, Utc::now()),
            Err(OrderError::NotCreated)
        ));
    }
}
