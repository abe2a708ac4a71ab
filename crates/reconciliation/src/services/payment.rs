//! Payment processor port.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Money, PaymentLabel};

use super::lock;
use crate::error::{ReconciliationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementStatus {
    Succeeded,
    /// The processor knows the label but did not accept the money.
    Refused,
}

/// The processor's record of money moving for a label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub label: PaymentLabel,
    pub amount: Money,
    pub status: SettlementStatus,
    pub settled_at: DateTime<Utc>,
    pub operation_id: String,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Registers a payable request and returns the URL the user pays at.
    async fn create_payable_request(&self, label: &PaymentLabel, amount: Money) -> Result<String>;

    /// Settlement lookup by label; `None` until the processor has one.
    async fn lookup_settlement(&self, label: &PaymentLabel) -> Result<Option<Settlement>>;
}

#[derive(Debug, Default)]
struct ProcessorState {
    requests: HashMap<PaymentLabel, Money>,
    settlements: HashMap<PaymentLabel, Settlement>,
    request_calls: usize,
    lookup_calls: usize,
    next_operation: u32,
    fail_on_request: bool,
    fail_on_lookup: bool,
    request_delay: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentProcessor {
    state: Arc<Mutex<ProcessorState>>,
}

impl InMemoryPaymentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the user paying `amount` for `label`.
    pub fn settle(&self, label: &PaymentLabel, amount: Money) {
        self.record_settlement(label, amount, SettlementStatus::Succeeded);
    }

    pub fn refuse(&self, label: &PaymentLabel) {
        self.record_settlement(label, Money::zero(), SettlementStatus::Refused);
    }

    fn record_settlement(&self, label: &PaymentLabel, amount: Money, status: SettlementStatus) {
        let mut state = lock(&self.state);
        state.next_operation += 1;
        let operation_id = format!("OP-{:06}", state.next_operation);
        state.settlements.insert(
            label.clone(),
            Settlement {
                label: label.clone(),
                amount,
                status,
                settled_at: Utc::now(),
                operation_id,
            },
        );
    }

    pub fn set_fail_on_request(&self, fail: bool) {
        lock(&self.state).fail_on_request = fail;
    }

    pub fn set_fail_on_lookup(&self, fail: bool) {
        lock(&self.state).fail_on_lookup = fail;
    }

    /// Makes `create_payable_request` take at least `delay`.
    pub fn set_request_delay(&self, delay: Option<Duration>) {
        lock(&self.state).request_delay = delay;
    }

    /// Labels with a registered payable request.
    pub fn requested_labels(&self) -> Vec<PaymentLabel> {
        lock(&self.state).requests.keys().cloned().collect()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.state).request_calls
    }

    pub fn lookup_count(&self) -> usize {
        lock(&self.state).lookup_calls
    }
}

#[async_trait]
impl PaymentProcessor for InMemoryPaymentProcessor {
    async fn create_payable_request(&self, label: &PaymentLabel, amount: Money) -> Result<String> {
        let delay = {
            let mut state = lock(&self.state);
            state.request_calls += 1;
            if state.fail_on_request {
                return Err(ReconciliationError::PaymentRequest(
                    "processor unavailable".to_string(),
                ));
            }
            state.request_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        lock(&self.state).requests.insert(label.clone(), amount);
        Ok(format!("https://pay.example/quickpay?label={label}&sum={amount}"))
    }

    async fn lookup_settlement(&self, label: &PaymentLabel) -> Result<Option<Settlement>> {
        let mut state = lock(&self.state);
        state.lookup_calls += 1;
        if state.fail_on_lookup {
            return Err(ReconciliationError::PaymentRequest(
                "processor unavailable".to_string(),
            ));
        }
        Ok(state.settlements.get(label).cloned())
    }
}

#[cfg(test)]
mod tests {
    use common::AggregateId;

    use super::*;

    #[tokio::test]
    async fn test_settlement_appears_after_payment() {
        let processor = InMemoryPaymentProcessor::new();
        let label = PaymentLabel::generate(AggregateId::new());

        let url = processor
            .create_payable_request(&label, Money::from_minor_units(200))
            .await
            .unwrap();
        assert!(url.contains(label.as_str()));
        assert!(processor.lookup_settlement(&label).await.unwrap().is_none());

        processor.settle(&label, Money::from_minor_units(200));
        let settlement = processor.lookup_settlement(&label).await.unwrap().unwrap();
        assert_eq!(settlement.amount, Money::from_minor_units(200));
        assert_eq!(settlement.status, SettlementStatus::Succeeded);
        assert_eq!(processor.lookup_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_request_registers_nothing() {
        let processor = InMemoryPaymentProcessor::new();
        processor.set_fail_on_request(true);
        let label = PaymentLabel::generate(AggregateId::new());

        let result = processor
            .create_payable_request(&label, Money::from_minor_units(1))
            .await;

        assert!(matches!(result, Err(ReconciliationError::PaymentRequest(_))));
        assert!(processor.requested_labels().is_empty());
        assert_eq!(processor.request_count(), 1);
    }
}
