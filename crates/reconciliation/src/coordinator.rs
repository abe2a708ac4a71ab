//! Reconciliation Coordinator: the only component that chains one step of
//! an order's lifecycle into the next.

use async_trait::async_trait;
use chrono::Utc;
use common::AggregateId;
use domain::{
    Actor, CheckoutToken, CustomerDirectory, DeliveryInfo, Money, Order, OrderLedger, OrderState,
    PaymentLabel, PaymentRecord, PaymentStatus, Transition, UserId,
};
use event_store::EventStore;
use serde::Serialize;

use crate::config::ReconciliationConfig;
use crate::error::{ReconciliationError, Result};
use crate::orchestrator::{PaymentOrchestrator, PaymentVerification};
use crate::services::{
    CartStore, Catalog, CommerceSystem, Notification, NotificationKind, Notifier,
    PaymentProcessor, Recipient, Settlement, call_with_timeout,
};
use crate::snapshot::CartSnapshotBuilder;
use crate::sync::CommerceSyncAgent;

/// Rounds of re-read and retry when a cancellation races another writer.
const CANCEL_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutStarted {
    pub order_id: AggregateId,
    /// False when the request was folded into an order created moments ago.
    pub created: bool,
    pub total_amount: Money,
}

/// Drives one order as far as it can currently go.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, order_id: AggregateId) -> Result<OrderState>;
}

/// Who asked for a verification. Only the sweep gives up on a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    OnDemand,
    Sweep,
}

pub struct ReconciliationCoordinator<S, C, K, P, M, N>
where
    S: EventStore,
    C: Catalog,
    K: CartStore,
    P: PaymentProcessor,
    M: CommerceSystem,
    N: Notifier,
{
    ledger: OrderLedger<S>,
    snapshots: CartSnapshotBuilder<C, K>,
    payments: PaymentOrchestrator<S, P>,
    sync: CommerceSyncAgent<S, M>,
    notifier: N,
    config: ReconciliationConfig,
}

impl<S, C, K, P, M, N> ReconciliationCoordinator<S, C, K, P, M, N>
where
    S: EventStore + Clone,
    C: Catalog,
    K: CartStore,
    P: PaymentProcessor,
    M: CommerceSystem,
    N: Notifier,
{
    pub fn new(
        store: S,
        catalog: C,
        carts: K,
        processor: P,
        commerce: M,
        notifier: N,
        config: ReconciliationConfig,
    ) -> Self {
        let ledger = OrderLedger::new(store.clone());
        let timeout = config.external_call_timeout;
        Self {
            snapshots: CartSnapshotBuilder::new(catalog, carts, timeout),
            payments: PaymentOrchestrator::new(ledger.clone(), processor, timeout, config.poll),
            sync: CommerceSyncAgent::new(
                ledger.clone(),
                CustomerDirectory::new(store),
                commerce,
                timeout,
                config.sync_lease,
                config.fallback_email_domain.clone(),
            ),
            ledger,
            notifier,
            config,
        }
    }
}

impl<S, C, K, P, M, N> ReconciliationCoordinator<S, C, K, P, M, N>
where
    S: EventStore,
    C: Catalog,
    K: CartStore,
    P: PaymentProcessor,
    M: CommerceSystem,
    N: Notifier,
{
    pub fn ledger(&self) -> &OrderLedger<S> {
        &self.ledger
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.config.admin_ids.contains(&user_id)
    }

    pub async fn get_order(&self, order_id: AggregateId) -> Result<Order> {
        Ok(self.ledger.require_order(order_id).await?)
    }

    /// Snapshots the user's cart into a `pending` order.
    ///
    /// Submitting the same cart again inside the duplicate window returns
    /// the order created first.
    #[tracing::instrument(skip(self))]
    pub async fn begin_checkout(&self, user_id: UserId) -> Result<CheckoutStarted> {
        let snapshot = self.snapshots.build(user_id).await?;
        let token = CheckoutToken::for_snapshot(&snapshot, self.config.duplicate_window);
        let created = self.ledger.create_order(&snapshot, &token).await?;

        Ok(CheckoutStarted {
            order_id: created.order_id,
            created: created.created,
            total_amount: created.order.total_amount(),
        })
    }

    /// Freezes delivery details and returns the payment redirect.
    #[tracing::instrument(skip(self, delivery))]
    pub async fn confirm_checkout(
        &self,
        order_id: AggregateId,
        delivery: DeliveryInfo,
    ) -> Result<String> {
        delivery
            .validate()
            .map_err(ReconciliationError::InvalidDelivery)?;
        self.payments.request_payment(order_id, Some(delivery)).await
    }

    /// User-triggered verification. Never fails the order for slowness.
    ///
    /// A paid order whose remote sync fails stays `paid`; the sweep retries.
    /// Failed and cancelled orders are still looked up so that money arriving
    /// after the order closed reaches the administrators.
    #[tracing::instrument(skip(self))]
    pub async fn check_payment_status(&self, order_id: AggregateId) -> Result<OrderState> {
        let order = self.ledger.require_order(order_id).await?;
        match order.state() {
            OrderState::AwaitingPayment => {
                self.advance_payment(order_id, order, Trigger::OnDemand).await
            }
            OrderState::Paid => {
                let user_id = owner(order_id, &order)?;
                self.finish_on_demand(order_id, self.sync_and_mark(order_id, user_id).await)
            }
            state @ (OrderState::Failed | OrderState::Cancelled) => {
                self.check_late_payment(order_id, &order).await;
                Ok(state)
            }
            state => Ok(state),
        }
    }

    /// Processor callback: the label names the order, the order's own
    /// record must agree.
    #[tracing::instrument(skip(self))]
    pub async fn handle_payment_notification(&self, label: &str) -> Result<OrderState> {
        let label = PaymentLabel::from_raw(label);
        let unknown = || ReconciliationError::UnknownPaymentLabel(label.to_string());

        let order_id = label.order_id().ok_or_else(unknown)?;
        let order = self.ledger.get_order(order_id).await?.ok_or_else(unknown)?;
        if order.payment().map(|p| &p.label) != Some(&label) {
            return Err(unknown());
        }

        match order.state() {
            OrderState::AwaitingPayment => {
                self.advance_payment(order_id, order, Trigger::OnDemand).await
            }
            OrderState::Paid => {
                let user_id = owner(order_id, &order)?;
                self.finish_on_demand(order_id, self.sync_and_mark(order_id, user_id).await)
            }
            state @ (OrderState::Failed | OrderState::Cancelled) => {
                self.check_late_payment(order_id, &order).await;
                Ok(state)
            }
            state => Ok(state),
        }
    }

    /// Cancels an order on behalf of `actor`.
    ///
    /// Users may cancel their own orders until payment settles. Paid and
    /// synced orders need an administrator; a linked remote order is then
    /// cancelled too.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel_order(
        &self,
        order_id: AggregateId,
        actor: Actor,
        reason: &str,
    ) -> Result<OrderState> {
        if let Actor::Admin(admin) = actor
            && !self.is_admin(admin)
        {
            return Err(ReconciliationError::Forbidden(format!(
                "user {admin} is not an administrator"
            )));
        }

        for _ in 0..CANCEL_ATTEMPTS {
            let order = self.ledger.require_order(order_id).await?;
            let user_id = owner(order_id, &order)?;
            if let Actor::User(requester) = actor
                && requester != user_id
            {
                return Err(ReconciliationError::OrderNotFound(order_id));
            }

            let state = order.state();
            let refusal = match (state, actor) {
                (OrderState::Cancelled | OrderState::Failed, _) => Some("order is already closed"),
                (OrderState::Paid | OrderState::Synced, Actor::User(_)) => {
                    Some("order is paid, contact support to cancel it")
                }
                _ => None,
            };
            if let Some(reason) = refusal {
                return Err(ReconciliationError::InvalidState {
                    order_id,
                    state,
                    reason,
                });
            }

            let transition = Transition::Cancel {
                actor,
                reason: reason.to_string(),
            };
            match self.ledger.transition(order_id, state, transition).await {
                Ok(cancelled) => {
                    tracing::info!(%order_id, %actor, from = %state, "order cancelled");
                    metrics::counter!("orders_cancelled_total").increment(1);
                    if cancelled.needs_compensation()
                        && let Err(e) = self.sync.compensate(order_id).await
                    {
                        tracing::warn!(%order_id, error = %e, "compensation deferred to sweep");
                    }
                    if !matches!(actor, Actor::User(_)) {
                        self.notify(
                            Recipient::User(user_id),
                            order_id,
                            NotificationKind::OrderCancelled,
                            format!("Your order was cancelled: {reason}"),
                        )
                        .await;
                    }
                    return Ok(OrderState::Cancelled);
                }
                Err(e) if e.is_stale() => {
                    tracing::debug!(%order_id, "order changed during cancellation, re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ReconciliationError::StaleState(format!(
            "order {order_id} kept changing during cancellation"
        )))
    }

    /// Re-evaluates the order and issues whatever idempotent step it needs.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, order_id: AggregateId) -> Result<OrderState> {
        let order = self.ledger.require_order(order_id).await?;
        match order.state() {
            OrderState::AwaitingPayment => {
                self.advance_payment(order_id, order, Trigger::Sweep).await
            }
            OrderState::Paid => {
                let user_id = owner(order_id, &order)?;
                self.sync_and_mark(order_id, user_id).await
            }
            OrderState::Cancelled if order.needs_compensation() => {
                self.sync.compensate(order_id).await?;
                Ok(OrderState::Cancelled)
            }
            state => Ok(state),
        }
    }

    async fn advance_payment(
        &self,
        order_id: AggregateId,
        order: Order,
        trigger: Trigger,
    ) -> Result<OrderState> {
        let user_id = owner(order_id, &order)?;
        let payment = order
            .payment()
            .ok_or(ReconciliationError::InvalidState {
                order_id,
                state: order.state(),
                reason: "payment was never requested",
            })?;
        let previous_status = payment.status;

        match self.payments.verify_payment(order_id).await {
            Ok(PaymentVerification::Success(settlement)) => {
                let state = self.mark_paid(order_id, user_id, &settlement).await?;
                if state != OrderState::Paid {
                    return Ok(state);
                }
                let synced = self.sync_and_mark(order_id, user_id).await;
                match trigger {
                    Trigger::OnDemand => self.finish_on_demand(order_id, synced),
                    Trigger::Sweep => synced,
                }
            }
            Ok(PaymentVerification::Pending) => {
                if self.polling_exhausted(trigger, payment) {
                    return self
                        .expire(order_id, user_id, "payment not received in time")
                        .await;
                }
                Ok(OrderState::AwaitingPayment)
            }
            Ok(PaymentVerification::Unknown) => {
                if previous_status != PaymentStatus::Unknown {
                    self.notify_admins(
                        order_id,
                        NotificationKind::PaymentUnresolved,
                        format!("Payment {} needs manual review", payment.label),
                    )
                    .await;
                }
                if self.polling_exhausted(trigger, payment) {
                    return self
                        .expire(order_id, user_id, "payment could not be confirmed")
                        .await;
                }
                Ok(OrderState::AwaitingPayment)
            }
            Err(e @ ReconciliationError::PaymentAmountMismatch { .. }) => {
                if previous_status != PaymentStatus::Unknown {
                    self.notify_admins(order_id, NotificationKind::AmountMismatch, e.to_string())
                        .await;
                }
                if self.polling_exhausted(trigger, payment) {
                    return self
                        .expire(order_id, user_id, "settled amount does not match the order")
                        .await;
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Applies a confirmed settlement. Returns the state the order ended in.
    async fn mark_paid(
        &self,
        order_id: AggregateId,
        user_id: UserId,
        settlement: &Settlement,
    ) -> Result<OrderState> {
        let transition = Transition::MarkPaid {
            amount: settlement.amount,
            settled_at: settlement.settled_at,
        };
        match self
            .ledger
            .transition(order_id, OrderState::AwaitingPayment, transition)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_stale() => {
                let state = self.ledger.require_order(order_id).await?.state();
                if matches!(state, OrderState::Failed | OrderState::Cancelled) {
                    self.record_late_settlement(order_id, state, settlement.amount)
                        .await;
                }
                return Ok(state);
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(%order_id, amount = %settlement.amount, "payment confirmed");
        metrics::counter!("orders_paid_total").increment(1);

        let cleared = call_with_timeout(
            self.config.external_call_timeout,
            "clear_cart",
            self.snapshots.carts().clear_cart(user_id),
            ReconciliationError::CartStore,
        )
        .await;
        if let Err(e) = cleared {
            tracing::warn!(%order_id, %user_id, error = %e, "could not clear cart");
        }

        self.notify(
            Recipient::User(user_id),
            order_id,
            NotificationKind::PaymentReceived,
            format!("Payment of {} received", settlement.amount),
        )
        .await;
        Ok(OrderState::Paid)
    }

    async fn sync_and_mark(&self, order_id: AggregateId, user_id: UserId) -> Result<OrderState> {
        let link = self.sync.sync_order(order_id).await?;
        match self
            .ledger
            .transition(order_id, OrderState::Paid, Transition::MarkSynced)
            .await
        {
            Ok(_) => {
                self.notify(
                    Recipient::User(user_id),
                    order_id,
                    NotificationKind::OrderSynced,
                    format!("Order confirmed as {}", link.remote_order_id),
                )
                .await;
                Ok(OrderState::Synced)
            }
            Err(e) if e.is_stale() => Ok(self.ledger.require_order(order_id).await?.state()),
            Err(e) => Err(e.into()),
        }
    }

    /// Sync failures after payment are the sweep's problem, not the caller's.
    fn finish_on_demand(
        &self,
        order_id: AggregateId,
        synced: Result<OrderState>,
    ) -> Result<OrderState> {
        match synced {
            Err(e) if e.is_retryable() => {
                tracing::warn!(%order_id, error = %e, "remote sync deferred to sweep");
                Ok(OrderState::Paid)
            }
            other => other,
        }
    }

    /// Only the sweep gives up, and only once the poll bound is spent.
    fn polling_exhausted(&self, trigger: Trigger, payment: &PaymentRecord) -> bool {
        trigger == Trigger::Sweep
            && self
                .payments
                .poll_exhausted(payment, payment.check_count + 1, Utc::now())
    }

    async fn expire(
        &self,
        order_id: AggregateId,
        user_id: UserId,
        reason: &str,
    ) -> Result<OrderState> {
        let transition = Transition::Fail {
            reason: reason.to_string(),
        };
        match self
            .ledger
            .transition(order_id, OrderState::AwaitingPayment, transition)
            .await
        {
            Ok(_) => {
                tracing::warn!(%order_id, reason, "payment polling exhausted");
                metrics::counter!("orders_failed_total").increment(1);
                self.notify(
                    Recipient::User(user_id),
                    order_id,
                    NotificationKind::PaymentExpired,
                    format!("The order was closed: {reason}"),
                )
                .await;
                self.notify_admins(
                    order_id,
                    NotificationKind::PaymentExpired,
                    format!("Order {order_id} failed: {reason}"),
                )
                .await;
                Ok(OrderState::Failed)
            }
            Err(e) if e.is_stale() => Ok(self.ledger.require_order(order_id).await?.state()),
            Err(e) => Err(e.into()),
        }
    }

    /// Money may still arrive for an order that was closed meanwhile.
    ///
    /// Administrators hear about each late settlement once; it is recorded
    /// as a successful check so repeated lookups stay quiet.
    async fn check_late_payment(&self, order_id: AggregateId, order: &Order) {
        let state = order.state();
        let Some(previous) = order.payment().map(|p| p.status) else {
            return;
        };

        match self.payments.verify_payment(order_id).await {
            Ok(PaymentVerification::Success(settlement)) => {
                if previous != PaymentStatus::Success {
                    self.record_late_settlement(order_id, state, settlement.amount)
                        .await;
                }
            }
            Err(ReconciliationError::PaymentAmountMismatch { reported, .. }) => {
                if previous != PaymentStatus::Unknown {
                    self.report_late_payment(order_id, state, reported).await;
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(%order_id, error = %e, "late payment check failed"),
        }
    }

    async fn record_late_settlement(
        &self,
        order_id: AggregateId,
        state: OrderState,
        amount: Money,
    ) {
        if let Err(e) = self
            .ledger
            .record_payment_check(order_id, PaymentStatus::Success)
            .await
        {
            tracing::warn!(%order_id, error = %e, "could not record late settlement");
        }
        self.report_late_payment(order_id, state, amount).await;
    }

    async fn report_late_payment(&self, order_id: AggregateId, state: OrderState, amount: Money) {
        tracing::warn!(%order_id, %state, %amount, "settlement for closed order");
        metrics::counter!("late_payments_total").increment(1);
        self.notify_admins(
            order_id,
            NotificationKind::LatePayment,
            format!("{amount} settled for {state} order {order_id}, refund manually"),
        )
        .await;
    }

    async fn notify(
        &self,
        recipient: Recipient,
        order_id: AggregateId,
        kind: NotificationKind,
        message: String,
    ) {
        let notification = Notification {
            recipient,
            order_id,
            kind,
            message,
        };
        if let Err(e) = self.notifier.notify(notification).await {
            tracing::warn!(%order_id, ?kind, error = %e, "notification not delivered");
        }
    }

    async fn notify_admins(&self, order_id: AggregateId, kind: NotificationKind, message: String) {
        if self.config.admin_ids.is_empty() {
            tracing::warn!(%order_id, ?kind, "no administrators configured");
            return;
        }
        for admin in &self.config.admin_ids {
            self.notify(Recipient::Admin(*admin), order_id, kind, message.clone())
                .await;
        }
    }
}

#[async_trait]
impl<S, C, K, P, M, N> Reconciler for ReconciliationCoordinator<S, C, K, P, M, N>
where
    S: EventStore,
    C: Catalog,
    K: CartStore,
    P: PaymentProcessor,
    M: CommerceSystem,
    N: Notifier,
{
    async fn reconcile(&self, order_id: AggregateId) -> Result<OrderState> {
        ReconciliationCoordinator::reconcile(self, order_id).await
    }
}

fn owner(order_id: AggregateId, order: &Order) -> Result<UserId> {
    order.user_id().ok_or(ReconciliationError::InvalidState {
        order_id,
        state: order.state(),
        reason: "order has no owner",
    })
}
