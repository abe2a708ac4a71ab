//! Payment Orchestrator: payable requests and settlement verification.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{
    DeliveryInfo, DomainError, Order, OrderError, OrderLedger, OrderState, PaymentLabel,
    PaymentRecord, PaymentStatus, Transition,
};
use event_store::EventStore;

use crate::config::PollPolicy;
use crate::error::{ReconciliationError, Result};
use crate::services::{PaymentProcessor, Settlement, SettlementStatus, call_with_timeout};

/// What the processor says about an order's payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentVerification {
    /// Settled for exactly the order total.
    Success(Settlement),
    /// No settlement yet.
    Pending,
    /// Refused, or otherwise not something the flow can act on.
    Unknown,
}

impl PaymentVerification {
    fn outcome(&self) -> &'static str {
        match self {
            PaymentVerification::Success(_) => "success",
            PaymentVerification::Pending => "pending",
            PaymentVerification::Unknown => "unknown",
        }
    }
}

pub struct PaymentOrchestrator<S: EventStore, P: PaymentProcessor> {
    ledger: OrderLedger<S>,
    processor: P,
    call_timeout: Duration,
    poll: PollPolicy,
}

impl<S: EventStore, P: PaymentProcessor> PaymentOrchestrator<S, P> {
    pub fn new(
        ledger: OrderLedger<S>,
        processor: P,
        call_timeout: Duration,
        poll: PollPolicy,
    ) -> Self {
        Self {
            ledger,
            processor,
            call_timeout,
            poll,
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Registers a payable request for a pending order and returns where the
    /// user pays.
    ///
    /// Idempotent: an order already awaiting payment returns its stored
    /// redirect, and a retry after a failed processor call reuses the label
    /// recorded by the first attempt. `delivery` is only read when no payment
    /// record exists yet.
    #[tracing::instrument(skip(self, delivery))]
    pub async fn request_payment(
        &self,
        order_id: AggregateId,
        delivery: Option<DeliveryInfo>,
    ) -> Result<String> {
        let order = self.ledger.require_order(order_id).await?;
        match order.state() {
            OrderState::Pending => {}
            OrderState::AwaitingPayment => return stored_redirect(&order),
            state => {
                return Err(ReconciliationError::InvalidState {
                    order_id,
                    state,
                    reason: "payment can only be requested for a pending order",
                });
            }
        }

        let payment = match order.payment() {
            Some(existing) => {
                tracing::debug!(%order_id, label = %existing.label, "reusing payment label");
                existing.clone()
            }
            None => {
                let delivery = delivery.ok_or_else(|| {
                    ReconciliationError::InvalidDelivery("delivery info required".to_string())
                })?;
                match self.record_request(order_id, delivery).await? {
                    Recorded::Payment(payment) => payment,
                    Recorded::AlreadyAwaiting(redirect_url) => return Ok(redirect_url),
                }
            }
        };

        let redirect_url = call_with_timeout(
            self.call_timeout,
            "create_payable_request",
            self.processor
                .create_payable_request(&payment.label, payment.requested_amount),
            ReconciliationError::PaymentRequest,
        )
        .await
        .inspect_err(|e| {
            tracing::warn!(%order_id, label = %payment.label, error = %e, "payable request failed");
            metrics::counter!("payment_requests_total", "outcome" => "error").increment(1);
        })?;

        let transition = Transition::AwaitPayment {
            redirect_url: redirect_url.clone(),
        };
        match self
            .ledger
            .transition(order_id, OrderState::Pending, transition)
            .await
        {
            Ok(_) => {
                tracing::info!(%order_id, label = %payment.label, "payment requested");
                metrics::counter!("payment_requests_total", "outcome" => "ok").increment(1);
                Ok(redirect_url)
            }
            Err(e) if e.is_stale() => {
                let order = self.ledger.require_order(order_id).await?;
                if order.state() == OrderState::AwaitingPayment {
                    stored_redirect(&order)
                } else {
                    Err(ReconciliationError::StaleState(format!(
                        "order moved to {} during payment request",
                        order.state()
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn record_request(
        &self,
        order_id: AggregateId,
        delivery: DeliveryInfo,
    ) -> Result<Recorded> {
        let label = PaymentLabel::generate(order_id);
        match self
            .ledger
            .record_payment_request(order_id, label, delivery)
            .await
        {
            Ok(order) => payment_of(&order).map(Recorded::Payment),
            Err(DomainError::Order(OrderError::PaymentAlreadyRequested)) => {
                self.recorded_by_other(order_id).await
            }
            Err(e) if e.is_stale() => self.recorded_by_other(order_id).await,
            Err(e) => Err(e.into()),
        }
    }

    /// A concurrent request recorded the payment first; continue with theirs.
    async fn recorded_by_other(&self, order_id: AggregateId) -> Result<Recorded> {
        let order = self.ledger.require_order(order_id).await?;
        match order.state() {
            OrderState::AwaitingPayment => stored_redirect(&order).map(Recorded::AlreadyAwaiting),
            OrderState::Pending => payment_of(&order).map(Recorded::Payment),
            state => Err(ReconciliationError::StaleState(format!(
                "order moved to {state} during payment request"
            ))),
        }
    }

    /// Asks the processor for the settlement behind the order's label.
    ///
    /// Never changes the order state. A settlement for a different amount
    /// than the frozen total marks the payment `unknown` and fails with
    /// `PaymentAmountMismatch`.
    #[tracing::instrument(skip(self))]
    pub async fn verify_payment(&self, order_id: AggregateId) -> Result<PaymentVerification> {
        let order = self.ledger.require_order(order_id).await?;
        let payment = order
            .payment()
            .ok_or(ReconciliationError::InvalidState {
                order_id,
                state: order.state(),
                reason: "payment was never requested",
            })?;

        let settlement = call_with_timeout(
            self.call_timeout,
            "lookup_settlement",
            self.processor.lookup_settlement(&payment.label),
            ReconciliationError::PaymentRequest,
        )
        .await?;

        let verification = match settlement {
            None => {
                self.record_check(order_id, PaymentStatus::Pending).await?;
                PaymentVerification::Pending
            }
            Some(settlement) if settlement.status == SettlementStatus::Refused => {
                tracing::warn!(%order_id, label = %payment.label, "processor refused payment");
                self.record_check(order_id, PaymentStatus::Unknown).await?;
                PaymentVerification::Unknown
            }
            Some(settlement) if settlement.amount != payment.requested_amount => {
                tracing::warn!(
                    %order_id,
                    expected = %payment.requested_amount,
                    reported = %settlement.amount,
                    "settled amount does not match order total"
                );
                self.record_check(order_id, PaymentStatus::Unknown).await?;
                metrics::counter!("payment_verifications_total", "outcome" => "mismatch")
                    .increment(1);
                return Err(ReconciliationError::PaymentAmountMismatch {
                    order_id,
                    expected: payment.requested_amount,
                    reported: settlement.amount,
                });
            }
            Some(settlement) => PaymentVerification::Success(settlement),
        };

        metrics::counter!("payment_verifications_total", "outcome" => verification.outcome())
            .increment(1);
        Ok(verification)
    }

    /// True once automatic polling of `payment` should stop.
    ///
    /// `checks` counts the verification that just ran.
    pub fn poll_exhausted(
        &self,
        payment: &PaymentRecord,
        checks: u32,
        now: DateTime<Utc>,
    ) -> bool {
        self.poll.is_exhausted(checks, payment.requested_at, now)
    }

    async fn record_check(&self, order_id: AggregateId, status: PaymentStatus) -> Result<()> {
        match self.ledger.record_payment_check(order_id, status).await {
            Ok(_) => Ok(()),
            // Another checker wrote first; their record is as good as ours.
            Err(e) if e.is_stale() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

enum Recorded {
    Payment(PaymentRecord),
    AlreadyAwaiting(String),
}

fn payment_of(order: &Order) -> Result<PaymentRecord> {
    order
        .payment()
        .cloned()
        .ok_or_else(|| ReconciliationError::StaleState("payment record missing".to_string()))
}

fn stored_redirect(order: &Order) -> Result<String> {
    order
        .payment()
        .and_then(|p| p.redirect_url.clone())
        .ok_or_else(|| ReconciliationError::StaleState("redirect not recorded yet".to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use domain::{CartSnapshot, CheckoutToken, Money, OrderLine, ProductId, UserId};
    use event_store::InMemoryEventStore;

    use super::*;
    use crate::services::InMemoryPaymentProcessor;

    struct Fixture {
        store: InMemoryEventStore,
        ledger: OrderLedger<InMemoryEventStore>,
        processor: InMemoryPaymentProcessor,
        orchestrator: PaymentOrchestrator<InMemoryEventStore, InMemoryPaymentProcessor>,
    }

    fn fixture(call_timeout: Duration) -> Fixture {
        let store = InMemoryEventStore::new();
        let ledger = OrderLedger::new(store.clone());
        let processor = InMemoryPaymentProcessor::new();
        let orchestrator = PaymentOrchestrator::new(
            ledger.clone(),
            processor.clone(),
            call_timeout,
            PollPolicy::default(),
        );
        Fixture {
            store,
            ledger,
            processor,
            orchestrator,
        }
    }

    async fn pending_order(ledger: &OrderLedger<InMemoryEventStore>) -> AggregateId {
        let snapshot = CartSnapshot::new(
            UserId::new(1),
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
        ledger.create_order(&snapshot, &token).await.unwrap().order_id
    }

    fn delivery() -> DeliveryInfo {
        DeliveryInfo {
            full_name: "Ivan Ivanov".to_string(),
            phone: "+79991234567".to_string(),
            email: None,
            address: None,
            comment: None,
        }
    }

    #[tokio::test]
    async fn test_request_moves_order_to_awaiting_payment() {
        let f = fixture(Duration::from_secs(1));
        let order_id = pending_order(&f.ledger).await;

        let url = f
            .orchestrator
            .request_payment(order_id, Some(delivery()))
            .await
            .unwrap();

        let order = f.ledger.require_order(order_id).await.unwrap();
        assert_eq!(order.state(), OrderState::AwaitingPayment);
        assert_eq!(order.payment().unwrap().redirect_url.as_deref(), Some(url.as_str()));
        assert_eq!(order.payment().unwrap().requested_amount, Money::from_minor_units(200));
    }

    #[tokio::test]
    async fn test_repeated_request_returns_stored_redirect() {
        let f = fixture(Duration::from_secs(1));
        let order_id = pending_order(&f.ledger).await;

        let first = f
            .orchestrator
            .request_payment(order_id, Some(delivery()))
            .await
            .unwrap();
        let second = f.orchestrator.request_payment(order_id, None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.processor.request_count(), 1);
    }

    #[tokio::test]
    async fn test_first_request_needs_delivery_info() {
        let f = fixture(Duration::from_secs(1));
        let order_id = pending_order(&f.ledger).await;

        let err = f.orchestrator.request_payment(order_id, None).await.unwrap_err();
        assert!(matches!(err, ReconciliationError::InvalidDelivery(_)));
    }

    #[tokio::test]
    async fn test_processor_timeout_keeps_order_pending_and_retry_reuses_label() {
        let f = fixture(Duration::from_millis(20));
        let order_id = pending_order(&f.ledger).await;
        f.processor
            .set_request_delay(Some(Duration::from_millis(200)));

        let err = f
            .orchestrator
            .request_payment(order_id, Some(delivery()))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconciliationError::PaymentRequest(_)));
        assert!(err.is_retryable());

        let order = f.ledger.require_order(order_id).await.unwrap();
        assert_eq!(order.state(), OrderState::Pending);
        let label = order.payment().unwrap().label.clone();

        f.processor.set_request_delay(None);
        f.orchestrator.request_payment(order_id, None).await.unwrap();

        assert_eq!(f.processor.requested_labels(), vec![label]);
        assert_eq!(f.store.count_of_type("PaymentRequested").await, 1);
    }

    #[tokio::test]
    async fn test_verify_without_settlement_only_counts_the_check() {
        let f = fixture(Duration::from_secs(1));
        let order_id = pending_order(&f.ledger).await;
        f.orchestrator
            .request_payment(order_id, Some(delivery()))
            .await
            .unwrap();

        for _ in 0..3 {
            let verification = f.orchestrator.verify_payment(order_id).await.unwrap();
            assert_eq!(verification, PaymentVerification::Pending);
        }

        let order = f.ledger.require_order(order_id).await.unwrap();
        assert_eq!(order.state(), OrderState::AwaitingPayment);
        assert_eq!(order.payment().unwrap().check_count, 3);
        assert!(order.payment().unwrap().last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_mismatched_settlement_marks_payment_unknown() {
        let f = fixture(Duration::from_secs(1));
        let order_id = pending_order(&f.ledger).await;
        f.orchestrator
            .request_payment(order_id, Some(delivery()))
            .await
            .unwrap();
        let label = f.processor.requested_labels()[0].clone();
        f.processor.settle(&label, Money::from_minor_units(150));

        let err = f.orchestrator.verify_payment(order_id).await.unwrap_err();
        assert!(matches!(
            err,
            ReconciliationError::PaymentAmountMismatch { reported, .. }
                if reported == Money::from_minor_units(150)
        ));

        let order = f.ledger.require_order(order_id).await.unwrap();
        assert_eq!(order.state(), OrderState::AwaitingPayment);
        assert_eq!(order.payment().unwrap().status, PaymentStatus::Unknown);
    }

    #[tokio::test]
    async fn test_matching_settlement_is_success() {
        let f = fixture(Duration::from_secs(1));
        let order_id = pending_order(&f.ledger).await;
        f.orchestrator
            .request_payment(order_id, Some(delivery()))
            .await
            .unwrap();
        let label = f.processor.requested_labels()[0].clone();
        f.processor.settle(&label, Money::from_minor_units(200));

        let verification = f.orchestrator.verify_payment(order_id).await.unwrap();
        assert!(matches!(verification, PaymentVerification::Success(s) if s.label == label));
    }

    #[tokio::test]
    async fn test_refused_payment_is_unknown() {
        let f = fixture(Duration::from_secs(1));
        let order_id = pending_order(&f.ledger).await;
        f.orchestrator
            .request_payment(order_id, Some(delivery()))
            .await
            .unwrap();
        let label = f.processor.requested_labels()[0].clone();
        f.processor.refuse(&label);

        let verification = f.orchestrator.verify_payment(order_id).await.unwrap();
        assert_eq!(verification, PaymentVerification::Unknown);
    }

    #[tokio::test]
    async fn test_cancelled_order_cannot_request_payment() {
        let f = fixture(Duration::from_secs(1));
        let order_id = pending_order(&f.ledger).await;
        f.ledger
            .transition(
                order_id,
                OrderState::Pending,
                Transition::Cancel {
                    actor: domain::Actor::User(UserId::new(1)),
                    reason: "changed mind".to_string(),
                },
            )
            .await
            .unwrap();

        let err = f
            .orchestrator
            .request_payment(order_id, Some(delivery()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconciliationError::InvalidState {
                state: OrderState::Cancelled,
                ..
            }
        ));
    }
}
