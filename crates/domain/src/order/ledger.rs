//! The Order Ledger: the only writer of order state.

use chrono::{Duration, Utc};
use common::AggregateId;
use event_store::EventStore;

use crate::aggregate::Aggregate;
use crate::checkout::{CheckoutGuard, CheckoutToken};
use crate::command::CommandHandler;
use crate::error::DomainError;

use super::{
    CartSnapshot, DeliveryInfo, Order, OrderError, OrderState, PaymentLabel, PaymentStatus,
    RemoteCustomerId, RemoteOrderId, Transition,
};

/// Rounds of claim/create/reopen before `create_order` gives up.
const MAX_CHECKOUT_ROUNDS: usize = 5;

/// Outcome of [`OrderLedger::create_order`].
#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub order_id: AggregateId,
    /// False when the call was folded into an existing order.
    pub created: bool,
    pub order: Order,
}

/// Persists orders and moves them through their lifecycle.
///
/// Every write is a compare-and-set on the order stream's version. A caller
/// holding an outdated view gets an error for which
/// [`DomainError::is_stale`] is true, and should re-read rather than retry
/// blindly.
pub struct OrderLedger<S: EventStore> {
    orders: CommandHandler<S, Order>,
    guards: CommandHandler<S, CheckoutGuard>,
}

impl<S: EventStore + Clone> Clone for OrderLedger<S> {
    fn clone(&self) -> Self {
        Self {
            orders: self.orders.clone(),
            guards: self.guards.clone(),
        }
    }
}

impl<S: EventStore + Clone> OrderLedger<S> {
    pub fn new(store: S) -> Self {
        Self {
            orders: CommandHandler::new(store.clone()),
            guards: CommandHandler::new(store),
        }
    }
}

impl<S: EventStore> OrderLedger<S> {
    pub fn store(&self) -> &S {
        self.orders.store()
    }

    /// Persists `snapshot` as a `pending` order, folding duplicates.
    ///
    /// A repeat submission of the same cart by the same user inside the
    /// token's window returns the existing order with `created == false`.
    /// Once the guarded order is terminal, or the window has passed, the
    /// guard is reopened and a new order is created.
    #[tracing::instrument(skip(self, snapshot, token), fields(user_id = %snapshot.user_id, guard = %token.key()))]
    pub async fn create_order(
        &self,
        snapshot: &CartSnapshot,
        token: &CheckoutToken,
    ) -> Result<CreatedOrder, DomainError> {
        for _ in 0..MAX_CHECKOUT_ROUNDS {
            let now = Utc::now();
            let proposed = AggregateId::new();

            let guard = match self
                .guards
                .execute(token.key(), |g| g.claim(token, proposed, now))
                .await
            {
                Ok(result) => result.aggregate,
                Err(e) if e.is_stale() => continue,
                Err(e) => return Err(e),
            };
            let order_id = guard.order_id().ok_or(DomainError::Contended(token.key()))?;

            match self.orders.load_existing(order_id).await? {
                Some(order) if !order.is_terminal() && guard.is_within_window(token.window(), now) => {
                    tracing::info!(%order_id, "duplicate checkout folded into existing order");
                    metrics::counter!("checkout_duplicates_total").increment(1);
                    return Ok(CreatedOrder {
                        order_id,
                        created: false,
                        order,
                    });
                }
                Some(_) => {
                    let fresh = AggregateId::new();
                    match self
                        .guards
                        .execute(token.key(), |g| g.reopen(order_id, fresh, now))
                        .await
                    {
                        Ok(_) => tracing::debug!(previous = %order_id, %fresh, "checkout guard reopened"),
                        Err(e) if e.is_stale() => {}
                        Err(e) => return Err(e),
                    }
                }
                None => {
                    let created = self
                        .orders
                        .execute(order_id, |o| o.create(order_id, snapshot, token.key(), now))
                        .await;
                    match created {
                        Ok(result) => {
                            tracing::info!(%order_id, total = %snapshot.total_amount, "order created");
                            metrics::counter!("checkout_orders_created_total").increment(1);
                            return Ok(CreatedOrder {
                                order_id,
                                created: true,
                                order: result.aggregate,
                            });
                        }
                        Err(DomainError::Order(OrderError::AlreadyCreated)) => {}
                        Err(e) if e.is_stale() => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        Err(DomainError::Contended(token.key()))
    }

    /// Compare-and-set state change.
    ///
    /// Succeeds only if the order is currently in `from`; otherwise fails
    /// with a stale error. Transitions outside the lifecycle table fail with
    /// `InvalidTransition`.
    #[tracing::instrument(skip(self, transition), fields(transition = transition.name()))]
    pub async fn transition(
        &self,
        order_id: AggregateId,
        from: OrderState,
        transition: Transition,
    ) -> Result<Order, DomainError> {
        let result = self
            .orders
            .execute(order_id, |o| o.transition(from, &transition, Utc::now()))
            .await
            .map_err(|e| e.or_not_found(order_id))?;

        let to = transition.target();
        tracing::info!(%order_id, %from, %to, "order transitioned");
        metrics::counter!("order_transitions_total", "to" => to.as_str()).increment(1);
        Ok(result.aggregate)
    }

    /// Freezes delivery details and reserves the payment label.
    #[tracing::instrument(skip(self, delivery))]
    pub async fn record_payment_request(
        &self,
        order_id: AggregateId,
        label: PaymentLabel,
        delivery: DeliveryInfo,
    ) -> Result<Order, DomainError> {
        self.orders
            .execute(order_id, |o| o.request_payment(label, delivery, Utc::now()))
            .await
            .map(|r| r.aggregate)
            .map_err(|e| e.or_not_found(order_id))
    }

    pub async fn record_payment_check(
        &self,
        order_id: AggregateId,
        status: PaymentStatus,
    ) -> Result<Order, DomainError> {
        self.orders
            .execute(order_id, |o| o.record_payment_check(status, Utc::now()))
            .await
            .map(|r| r.aggregate)
            .map_err(|e| e.or_not_found(order_id))
    }

    /// Takes the exclusive right to create the remote order for `lease`.
    #[tracing::instrument(skip(self))]
    pub async fn claim_remote_sync(
        &self,
        order_id: AggregateId,
        lease: Duration,
    ) -> Result<Order, DomainError> {
        self.orders
            .execute(order_id, |o| o.claim_remote_sync(lease, Utc::now()))
            .await
            .map(|r| r.aggregate)
            .map_err(|e| e.or_not_found(order_id))
    }

    pub async fn release_remote_sync(
        &self,
        order_id: AggregateId,
        reason: &str,
    ) -> Result<Order, DomainError> {
        self.orders
            .execute(order_id, |o| o.release_remote_sync(reason, Utc::now()))
            .await
            .map(|r| r.aggregate)
            .map_err(|e| e.or_not_found(order_id))
    }

    #[tracing::instrument(skip(self))]
    pub async fn link_remote_order(
        &self,
        order_id: AggregateId,
        remote_order_id: RemoteOrderId,
        remote_customer_id: RemoteCustomerId,
    ) -> Result<Order, DomainError> {
        self.orders
            .execute(order_id, |o| {
                o.link_remote_order(remote_order_id, remote_customer_id, Utc::now())
            })
            .await
            .map(|r| r.aggregate)
            .map_err(|e| e.or_not_found(order_id))
    }

    pub async fn record_compensation(&self, order_id: AggregateId) -> Result<Order, DomainError> {
        self.orders
            .execute(order_id, |o| o.record_compensation(Utc::now()))
            .await
            .map(|r| r.aggregate)
            .map_err(|e| e.or_not_found(order_id))
    }

    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.orders.load_existing(order_id).await
    }

    pub async fn require_order(&self, order_id: AggregateId) -> Result<Order, DomainError> {
        self.get_order(order_id)
            .await?
            .ok_or(DomainError::OrderNotFound(order_id))
    }

    /// The order a checkout token currently points at, if any.
    pub async fn guarded_order(&self, token: &CheckoutToken) -> Result<Option<AggregateId>, DomainError> {
        let guard = self.guards.load(token.key()).await?;
        Ok(guard.id().and(guard.order_id()))
    }
}
