//! Commerce Sync Agent: mirrors paid orders into the commerce system.

use std::time::Duration;

use common::AggregateId;
use domain::{
    CustomerDirectory, DeliveryInfo, DomainError, Order, OrderError, OrderLedger, OrderState,
    RemoteCustomerId, RemoteLink, RemoteOrderId, UserId,
};
use event_store::EventStore;

use crate::error::{ReconciliationError, Result};
use crate::services::{
    CommerceSystem, CustomerProfile, RemoteOrderLine, RemoteOrderRequest, RemoteOrderStatus,
    ShippingMethod, call_with_timeout,
};

const FALLBACK_NAME: &str = "Customer";

/// Version conflicts tolerated while recording a created remote order.
const MAX_LINK_ATTEMPTS: usize = 5;

pub struct CommerceSyncAgent<S: EventStore, M: CommerceSystem> {
    ledger: OrderLedger<S>,
    customers: CustomerDirectory<S>,
    commerce: M,
    call_timeout: Duration,
    lease: chrono::Duration,
    fallback_email_domain: String,
}

impl<S: EventStore, M: CommerceSystem> CommerceSyncAgent<S, M> {
    pub fn new(
        ledger: OrderLedger<S>,
        customers: CustomerDirectory<S>,
        commerce: M,
        call_timeout: Duration,
        lease: chrono::Duration,
        fallback_email_domain: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            customers,
            commerce,
            call_timeout,
            lease,
            fallback_email_domain: fallback_email_domain.into(),
        }
    }

    pub fn commerce(&self) -> &M {
        &self.commerce
    }

    /// Creates the remote copy of a paid order and links it.
    ///
    /// An already linked order returns its link without touching the
    /// commerce system. A sync running elsewhere makes this call fail with
    /// `StaleState`. On failure the claim is released and any customer
    /// mapping already recorded is kept for the retry.
    #[tracing::instrument(skip(self))]
    pub async fn sync_order(&self, order_id: AggregateId) -> Result<RemoteLink> {
        let order = self.ledger.require_order(order_id).await?;
        if let Some(link) = order.remote_link() {
            tracing::debug!(%order_id, remote_order_id = %link.remote_order_id, "already synced");
            return Ok(link.clone());
        }
        if order.state() != OrderState::Paid {
            return Err(ReconciliationError::InvalidState {
                order_id,
                state: order.state(),
                reason: "only paid orders are synced",
            });
        }

        let order = match self.ledger.claim_remote_sync(order_id, self.lease).await {
            Ok(order) => order,
            Err(DomainError::Order(OrderError::AlreadyLinked)) => {
                return self.existing_link(order_id).await;
            }
            Err(e) if e.is_stale() => {
                return Err(ReconciliationError::StaleState(
                    "remote sync already in progress".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        match self.push(order_id, &order).await {
            Ok(link) => {
                tracing::info!(%order_id, remote_order_id = %link.remote_order_id, "order synced");
                metrics::counter!("remote_sync_total", "outcome" => "ok").increment(1);
                Ok(link)
            }
            Err(e) => {
                tracing::warn!(%order_id, error = %e, "remote sync failed");
                metrics::counter!("remote_sync_total", "outcome" => "error").increment(1);
                if let Err(release) = self
                    .ledger
                    .release_remote_sync(order_id, &e.to_string())
                    .await
                {
                    tracing::warn!(%order_id, error = %release, "could not release sync claim");
                }
                Err(e)
            }
        }
    }

    async fn push(&self, order_id: AggregateId, order: &Order) -> Result<RemoteLink> {
        let details = (order.user_id(), order.delivery(), order.payment());
        let (user_id, delivery, payment) = match details {
            (Some(user_id), Some(delivery), Some(payment)) => (user_id, delivery, payment),
            _ => {
                return Err(ReconciliationError::InvalidState {
                    order_id,
                    state: order.state(),
                    reason: "paid order is missing its payment details",
                });
            }
        };

        let (customer_id, customer) = self.ensure_customer(user_id, delivery).await?;

        let pickup = delivery.is_pickup();
        let request = RemoteOrderRequest {
            idempotency_key: order_id.to_string(),
            customer_id: customer_id.clone(),
            customer,
            lines: order
                .lines()
                .iter()
                .map(|line| RemoteOrderLine {
                    product_id: line.product_id.clone(),
                    name: line.name.clone(),
                    model: line.model.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                })
                .collect(),
            total: order.total_amount(),
            shipping_method: if pickup {
                ShippingMethod::Pickup
            } else {
                ShippingMethod::Delivery
            },
            shipping_address: if pickup {
                None
            } else {
                delivery.address.clone()
            },
            comment: delivery.comment.clone(),
            payment_reference: payment.label.to_string(),
            status: RemoteOrderStatus::Processing,
        };

        let remote_order_id = call_with_timeout(
            self.call_timeout,
            "create_remote_order",
            self.commerce.create_remote_order(&request),
            ReconciliationError::RemoteSync,
        )
        .await?;

        self.link(order_id, remote_order_id, customer_id).await
    }

    /// Records `remote_order_id` against the order, retrying version
    /// conflicts so a remote order that exists is never left unrecorded.
    async fn link(
        &self,
        order_id: AggregateId,
        remote_order_id: RemoteOrderId,
        customer_id: RemoteCustomerId,
    ) -> Result<RemoteLink> {
        let mut attempt = 1;
        loop {
            let result = self
                .ledger
                .link_remote_order(order_id, remote_order_id.clone(), customer_id.clone())
                .await;
            match result {
                Ok(order) if order.state() == OrderState::Cancelled => {
                    tracing::warn!(
                        %order_id,
                        %remote_order_id,
                        "order cancelled during sync, cancelling remote copy"
                    );
                    if let Err(e) = self.compensate(order_id).await {
                        tracing::warn!(%order_id, error = %e, "compensation left to the sweep");
                    }
                    return Err(ReconciliationError::InvalidState {
                        order_id,
                        state: OrderState::Cancelled,
                        reason: "order left paid state during sync",
                    });
                }
                Ok(order) => {
                    return order.remote_link().cloned().ok_or_else(|| {
                        ReconciliationError::StaleState("remote link not recorded".to_string())
                    });
                }
                Err(DomainError::Order(OrderError::AlreadyLinked)) => {
                    let link = self.existing_link(order_id).await?;
                    if link.remote_order_id != remote_order_id {
                        tracing::warn!(
                            %order_id,
                            %remote_order_id,
                            linked = %link.remote_order_id,
                            "cancelling duplicate remote order"
                        );
                        self.cancel_orphan(&remote_order_id).await;
                    }
                    return Ok(link);
                }
                Err(DomainError::Order(OrderError::NotAllowed { state, .. })) => {
                    tracing::warn!(
                        %order_id,
                        %state,
                        %remote_order_id,
                        "cancelling orphaned remote order"
                    );
                    self.cancel_orphan(&remote_order_id).await;
                    return Err(ReconciliationError::InvalidState {
                        order_id,
                        state,
                        reason: "order left paid state during sync",
                    });
                }
                Err(e) if e.is_stale() && attempt < MAX_LINK_ATTEMPTS => {
                    tracing::debug!(%order_id, attempt, "order changed while linking, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        %order_id,
                        %remote_order_id,
                        error = %e,
                        "remote order created but not linked"
                    );
                    return Err(e.into());
                }
            }
        }
    }

    async fn cancel_orphan(&self, remote_order_id: &RemoteOrderId) {
        let result = call_with_timeout(
            self.call_timeout,
            "update_remote_order_status",
            self.commerce
                .update_remote_order_status(remote_order_id, RemoteOrderStatus::Cancelled),
            ReconciliationError::RemoteSync,
        )
        .await;
        if let Err(e) = result {
            tracing::error!(%remote_order_id, error = %e, "orphaned remote order left open");
        }
    }

    /// Remote customer for `user_id`, created and mapped on first use.
    async fn ensure_customer(
        &self,
        user_id: UserId,
        delivery: &DeliveryInfo,
    ) -> Result<(RemoteCustomerId, CustomerProfile)> {
        let profile = self.profile_for(user_id, delivery);
        if let Some(existing) = self.customers.lookup(user_id).await? {
            return Ok((existing, profile));
        }

        let created = call_with_timeout(
            self.call_timeout,
            "upsert_customer",
            self.commerce.upsert_customer(&profile),
            ReconciliationError::RemoteSync,
        )
        .await?;
        let customer_id = self.customers.record(user_id, created).await?;
        tracing::info!(%user_id, %customer_id, "remote customer mapped");
        Ok((customer_id, profile))
    }

    fn profile_for(&self, user_id: UserId, delivery: &DeliveryInfo) -> CustomerProfile {
        let mut names = delivery.full_name.split_whitespace();
        let first_name = names.next().unwrap_or(FALLBACK_NAME).to_string();
        let last_name = names.collect::<Vec<_>>().join(" ");
        let email = delivery
            .email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("tg{user_id}@{}", self.fallback_email_domain));

        CustomerProfile {
            first_name,
            last_name: if last_name.is_empty() {
                FALLBACK_NAME.to_string()
            } else {
                last_name
            },
            email,
            phone: delivery.phone.clone(),
        }
    }

    async fn existing_link(&self, order_id: AggregateId) -> Result<RemoteLink> {
        let order = self.ledger.require_order(order_id).await?;
        order.remote_link().cloned().ok_or_else(|| {
            ReconciliationError::StaleState("remote link disappeared".to_string())
        })
    }

    /// Marks the remote copy of a cancelled order as cancelled.
    ///
    /// Returns `false` when there was nothing to compensate. Repeating the
    /// remote status update is harmless, so a lost race only costs a call.
    #[tracing::instrument(skip(self))]
    pub async fn compensate(&self, order_id: AggregateId) -> Result<bool> {
        let order = self.ledger.require_order(order_id).await?;
        let link = match order.remote_link() {
            Some(link) if order.needs_compensation() => link,
            _ => return Ok(false),
        };

        call_with_timeout(
            self.call_timeout,
            "update_remote_order_status",
            self.commerce
                .update_remote_order_status(&link.remote_order_id, RemoteOrderStatus::Cancelled),
            ReconciliationError::RemoteSync,
        )
        .await
        .inspect_err(|e| {
            tracing::warn!(%order_id, error = %e, "remote compensation failed");
            metrics::counter!("remote_compensations_total", "outcome" => "error").increment(1);
        })?;

        match self.ledger.record_compensation(order_id).await {
            Ok(_) => {
                tracing::info!(
                    %order_id,
                    remote_order_id = %link.remote_order_id,
                    "remote order cancelled"
                );
                metrics::counter!("remote_compensations_total", "outcome" => "ok").increment(1);
                Ok(true)
            }
            Err(DomainError::Order(OrderError::CompensationNotPending)) => Ok(false),
            Err(e) if e.is_stale() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use domain::{
        Actor, CartSnapshot, CheckoutToken, Money, OrderLine, PaymentLabel, ProductId, Transition,
    };
    use event_store::{
        AppendOptions, EventEnvelope, EventStream, InMemoryEventStore, Position, Version,
    };

    use super::*;
    use crate::services::InMemoryCommerceSystem;

    struct Fixture {
        ledger: OrderLedger<InMemoryEventStore>,
        commerce: InMemoryCommerceSystem,
        agent: CommerceSyncAgent<InMemoryEventStore, InMemoryCommerceSystem>,
    }

    fn fixture() -> Fixture {
        let store = InMemoryEventStore::new();
        let ledger = OrderLedger::new(store.clone());
        let commerce = InMemoryCommerceSystem::new();
        let agent = CommerceSyncAgent::new(
            ledger.clone(),
            CustomerDirectory::new(store),
            commerce.clone(),
            Duration::from_secs(1),
            chrono::Duration::seconds(120),
            "shop.test",
        );
        Fixture {
            ledger,
            commerce,
            agent,
        }
    }

    fn delivery(email: Option<&str>, address: Option<&str>) -> DeliveryInfo {
        DeliveryInfo {
            full_name: "Ivan Petrovich Sidorov".to_string(),
            phone: "+79991234567".to_string(),
            email: email.map(str::to_string),
            address: address.map(str::to_string),
            comment: Some("ring twice".to_string()),
        }
    }

    async fn paid_order(
        ledger: &OrderLedger<InMemoryEventStore>,
        delivery: DeliveryInfo,
    ) -> AggregateId {
        let snapshot = CartSnapshot::new(
            UserId::new(7),
            vec![OrderLine {
                product_id: ProductId::new("A"),
                name: "Tea".to_string(),
                model: "T-1".to_string(),
                quantity: 2,
                unit_price: Money::from_minor_units(100),
                options: BTreeMap::new(),
            }],
        )
        .unwrap();
        let token = CheckoutToken::for_snapshot(&snapshot, chrono::Duration::seconds(30));
        let order_id = ledger.create_order(&snapshot, &token).await.unwrap().order_id;

        ledger
            .record_payment_request(order_id, PaymentLabel::generate(order_id), delivery)
            .await
            .unwrap();
        ledger
            .transition(
                order_id,
                OrderState::Pending,
                Transition::AwaitPayment {
                    redirect_url: "https://pay.example/x".to_string(),
                },
            )
            .await
            .unwrap();
        ledger
            .transition(
                order_id,
                OrderState::AwaitingPayment,
                Transition::MarkPaid {
                    amount: Money::from_minor_units(200),
                    settled_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        order_id
    }

    #[tokio::test]
    async fn test_repeated_sync_creates_one_remote_order() {
        let f = fixture();
        let order_id = paid_order(&f.ledger, delivery(None, None)).await;

        let first = f.agent.sync_order(order_id).await.unwrap();
        for _ in 0..3 {
            let again = f.agent.sync_order(order_id).await.unwrap();
            assert_eq!(again, first);
        }

        assert_eq!(f.commerce.order_creations(), 1);
        assert_eq!(f.commerce.customer_upserts(), 1);
        let order = f.ledger.require_order(order_id).await.unwrap();
        assert_eq!(order.remote_link(), Some(&first));
    }

    #[tokio::test]
    async fn test_remote_request_carries_frozen_order() {
        let f = fixture();
        let order_id = paid_order(&f.ledger, delivery(None, None)).await;

        let link = f.agent.sync_order(order_id).await.unwrap();
        let (request, status) = f.commerce.order(&link.remote_order_id).unwrap();

        assert_eq!(status, RemoteOrderStatus::Processing);
        assert_eq!(request.idempotency_key, order_id.to_string());
        assert_eq!(request.total, Money::from_minor_units(200));
        assert_eq!(request.shipping_method, ShippingMethod::Pickup);
        assert_eq!(request.shipping_address, None);
        assert_eq!(request.customer.first_name, "Ivan");
        assert_eq!(request.customer.last_name, "Petrovich Sidorov");
        assert_eq!(request.customer.email, "tg7@shop.test");
        assert!(request.payment_reference.starts_with("ord-"));
    }

    #[tokio::test]
    async fn test_delivery_address_selects_delivery_shipping() {
        let f = fixture();
        let order_id = paid_order(
            &f.ledger,
            delivery(Some("ivan@example.com"), Some("Lenina 1")),
        )
        .await;

        let link = f.agent.sync_order(order_id).await.unwrap();
        let (request, _) = f.commerce.order(&link.remote_order_id).unwrap();

        assert_eq!(request.shipping_method, ShippingMethod::Delivery);
        assert_eq!(request.shipping_address.as_deref(), Some("Lenina 1"));
        assert_eq!(request.customer.email, "ivan@example.com");
    }

    #[tokio::test]
    async fn test_failed_remote_order_keeps_customer_and_releases_claim() {
        let f = fixture();
        let order_id = paid_order(&f.ledger, delivery(None, None)).await;
        f.commerce.set_fail_on_create(true);

        let err = f.agent.sync_order(order_id).await.unwrap_err();
        assert!(matches!(err, ReconciliationError::RemoteSync(_)));
        let order = f.ledger.require_order(order_id).await.unwrap();
        assert_eq!(order.state(), OrderState::Paid);
        assert!(order.sync_claimed_at().is_none());

        f.commerce.set_fail_on_create(false);
        f.agent.sync_order(order_id).await.unwrap();

        assert_eq!(f.commerce.customer_upserts(), 1);
        assert_eq!(f.commerce.order_count(), 1);
    }

    #[tokio::test]
    async fn test_claimed_sync_backs_off() {
        let f = fixture();
        let order_id = paid_order(&f.ledger, delivery(None, None)).await;
        f.ledger
            .claim_remote_sync(order_id, chrono::Duration::seconds(120))
            .await
            .unwrap();

        let err = f.agent.sync_order(order_id).await.unwrap_err();
        assert!(err.is_stale());
        assert_eq!(f.commerce.order_creations(), 0);
    }

    #[tokio::test]
    async fn test_unpaid_order_is_not_synced() {
        let f = fixture();
        let snapshot = CartSnapshot::new(
            UserId::new(7),
            vec![OrderLine {
                product_id: ProductId::new("A"),
                name: "Tea".to_string(),
                model: "T-1".to_string(),
                quantity: 1,
                unit_price: Money::from_minor_units(100),
                options: BTreeMap::new(),
            }],
        )
        .unwrap();
        let token = CheckoutToken::for_snapshot(&snapshot, chrono::Duration::seconds(30));
        let order_id = f.ledger.create_order(&snapshot, &token).await.unwrap().order_id;

        let err = f.agent.sync_order(order_id).await.unwrap_err();
        assert!(matches!(
            err,
            ReconciliationError::InvalidState {
                state: OrderState::Pending,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_compensation_runs_once() {
        let f = fixture();
        let order_id = paid_order(&f.ledger, delivery(None, None)).await;
        let link = f.agent.sync_order(order_id).await.unwrap();
        f.ledger
            .transition(order_id, OrderState::Paid, Transition::MarkSynced)
            .await
            .unwrap();
        f.ledger
            .transition(
                order_id,
                OrderState::Synced,
                Transition::Cancel {
                    actor: Actor::Admin(UserId::new(1)),
                    reason: "out of stock".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(f.agent.compensate(order_id).await.unwrap());
        assert!(!f.agent.compensate(order_id).await.unwrap());

        assert_eq!(f.commerce.status_updates(), 1);
        assert_eq!(
            f.commerce.order(&link.remote_order_id).unwrap().1,
            RemoteOrderStatus::Cancelled
        );
        assert!(!f.ledger.require_order(order_id).await.unwrap().needs_compensation());
    }

    /// Store that cancels the order right before the remote link is appended.
    #[derive(Clone)]
    struct CancelBeforeLink {
        inner: InMemoryEventStore,
        armed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl EventStore for CancelBeforeLink {
        async fn append(
            &self,
            events: Vec<EventEnvelope>,
            options: AppendOptions,
        ) -> event_store::Result<Version> {
            if let Some(first) = events.first()
                && first.event_type == "RemoteOrderLinked"
                && self.armed.swap(false, Ordering::SeqCst)
            {
                OrderLedger::new(self.inner.clone())
                    .transition(
                        first.aggregate_id,
                        OrderState::Paid,
                        Transition::Cancel {
                            actor: Actor::Admin(UserId::new(1)),
                            reason: "refunded by phone".to_string(),
                        },
                    )
                    .await
                    .unwrap();
            }
            self.inner.append(events, options).await
        }

        async fn get_events_for_aggregate(
            &self,
            aggregate_id: AggregateId,
        ) -> event_store::Result<Vec<EventEnvelope>> {
            self.inner.get_events_for_aggregate(aggregate_id).await
        }

        async fn get_aggregate_version(
            &self,
            aggregate_id: AggregateId,
        ) -> event_store::Result<Option<Version>> {
            self.inner.get_aggregate_version(aggregate_id).await
        }

        async fn stream_events_after(&self, after: Position) -> event_store::Result<EventStream> {
            self.inner.stream_events_after(after).await
        }

        async fn latest_position(&self) -> event_store::Result<Position> {
            self.inner.latest_position().await
        }
    }

    #[tokio::test]
    async fn test_cancel_racing_the_link_cancels_remote_copy() {
        let inner = InMemoryEventStore::new();
        let ledger = OrderLedger::new(inner.clone());
        let order_id = paid_order(&ledger, delivery(None, None)).await;

        let store = CancelBeforeLink {
            inner: inner.clone(),
            armed: Arc::new(AtomicBool::new(true)),
        };
        let commerce = InMemoryCommerceSystem::new();
        let agent = CommerceSyncAgent::new(
            OrderLedger::new(store.clone()),
            CustomerDirectory::new(store),
            commerce.clone(),
            Duration::from_secs(1),
            chrono::Duration::seconds(120),
            "shop.test",
        );

        let err = agent.sync_order(order_id).await.unwrap_err();
        assert!(matches!(
            err,
            ReconciliationError::InvalidState {
                state: OrderState::Cancelled,
                ..
            }
        ));

        let order = ledger.require_order(order_id).await.unwrap();
        assert_eq!(order.state(), OrderState::Cancelled);
        let link = order.remote_link().unwrap();
        assert!(!order.needs_compensation());
        assert!(order.cancellation().unwrap().compensated_at.is_some());
        assert_eq!(commerce.order_creations(), 1);
        assert_eq!(commerce.status_updates(), 1);
        assert_eq!(
            commerce.order(&link.remote_order_id).unwrap().1,
            RemoteOrderStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_unreachable_commerce_leaves_raced_link_for_the_sweep() {
        let inner = InMemoryEventStore::new();
        let ledger = OrderLedger::new(inner.clone());
        let order_id = paid_order(&ledger, delivery(None, None)).await;

        let store = CancelBeforeLink {
            inner: inner.clone(),
            armed: Arc::new(AtomicBool::new(true)),
        };
        let commerce = InMemoryCommerceSystem::new();
        commerce.set_fail_on_status_update(true);
        let agent = CommerceSyncAgent::new(
            OrderLedger::new(store.clone()),
            CustomerDirectory::new(store),
            commerce.clone(),
            Duration::from_secs(1),
            chrono::Duration::seconds(120),
            "shop.test",
        );

        assert!(agent.sync_order(order_id).await.is_err());
        let order = ledger.require_order(order_id).await.unwrap();
        assert!(order.remote_link().is_some());
        assert!(order.needs_compensation());

        commerce.set_fail_on_status_update(false);
        assert!(agent.compensate(order_id).await.unwrap());
        assert!(!ledger.require_order(order_id).await.unwrap().needs_compensation());
    }
}
