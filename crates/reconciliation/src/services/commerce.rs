//! Commerce system of record: customers and orders.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use domain::{Money, ProductId, RemoteCustomerId, RemoteOrderId};
use serde::Serialize;

use super::lock;
use crate::error::{ReconciliationError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteOrderStatus {
    /// Paid and handed over for fulfilment.
    Processing,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingMethod {
    Pickup,
    Delivery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteOrderLine {
    pub product_id: ProductId,
    pub name: String,
    pub model: String,
    pub quantity: u32,
    pub unit_price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteOrderRequest {
    /// Repeating a request with the same key returns the order created first.
    pub idempotency_key: String,
    pub customer_id: RemoteCustomerId,
    pub customer: CustomerProfile,
    pub lines: Vec<RemoteOrderLine>,
    pub total: Money,
    pub shipping_method: ShippingMethod,
    pub shipping_address: Option<String>,
    pub comment: Option<String>,
    pub payment_reference: String,
    pub status: RemoteOrderStatus,
}

#[async_trait]
pub trait CommerceSystem: Send + Sync {
    async fn upsert_customer(&self, profile: &CustomerProfile) -> Result<RemoteCustomerId>;

    async fn create_remote_order(&self, request: &RemoteOrderRequest) -> Result<RemoteOrderId>;

    async fn update_remote_order_status(
        &self,
        remote_order_id: &RemoteOrderId,
        status: RemoteOrderStatus,
    ) -> Result<()>;
}

#[derive(Debug, Default)]
struct CommerceState {
    customers: HashMap<String, RemoteCustomerId>,
    orders: HashMap<RemoteOrderId, (RemoteOrderRequest, RemoteOrderStatus)>,
    by_key: HashMap<String, RemoteOrderId>,
    next_id: u32,
    customer_upserts: usize,
    order_creations: usize,
    status_updates: usize,
    fail_on_upsert: bool,
    fail_on_create: bool,
    fail_on_status_update: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCommerceSystem {
    state: Arc<Mutex<CommerceState>>,
}

impl InMemoryCommerceSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_upsert(&self, fail: bool) {
        lock(&self.state).fail_on_upsert = fail;
    }

    pub fn set_fail_on_create(&self, fail: bool) {
        lock(&self.state).fail_on_create = fail;
    }

    pub fn set_fail_on_status_update(&self, fail: bool) {
        lock(&self.state).fail_on_status_update = fail;
    }

    pub fn customer_upserts(&self) -> usize {
        lock(&self.state).customer_upserts
    }

    /// Calls to `create_remote_order`, including repeats of a known key.
    pub fn order_creations(&self) -> usize {
        lock(&self.state).order_creations
    }

    pub fn status_updates(&self) -> usize {
        lock(&self.state).status_updates
    }

    pub fn order_count(&self) -> usize {
        lock(&self.state).orders.len()
    }

    pub fn order(&self, id: &RemoteOrderId) -> Option<(RemoteOrderRequest, RemoteOrderStatus)> {
        lock(&self.state).orders.get(id).cloned()
    }
}

#[async_trait]
impl CommerceSystem for InMemoryCommerceSystem {
    async fn upsert_customer(&self, profile: &CustomerProfile) -> Result<RemoteCustomerId> {
        let mut state = lock(&self.state);
        state.customer_upserts += 1;
        if state.fail_on_upsert {
            return Err(ReconciliationError::RemoteSync(
                "customer endpoint unavailable".to_string(),
            ));
        }
        if let Some(existing) = state.customers.get(&profile.email) {
            return Ok(existing.clone());
        }
        state.next_id += 1;
        let id = RemoteCustomerId::new(format!("C{}", state.next_id));
        state.customers.insert(profile.email.clone(), id.clone());
        Ok(id)
    }

    async fn create_remote_order(&self, request: &RemoteOrderRequest) -> Result<RemoteOrderId> {
        let mut state = lock(&self.state);
        state.order_creations += 1;
        if state.fail_on_create {
            return Err(ReconciliationError::RemoteSync(
                "order endpoint unavailable".to_string(),
            ));
        }
        if let Some(existing) = state.by_key.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }
        state.next_id += 1;
        let id = RemoteOrderId::new(format!("O{}", state.next_id));
        state
            .by_key
            .insert(request.idempotency_key.clone(), id.clone());
        state
            .orders
            .insert(id.clone(), (request.clone(), request.status));
        Ok(id)
    }

    async fn update_remote_order_status(
        &self,
        remote_order_id: &RemoteOrderId,
        status: RemoteOrderStatus,
    ) -> Result<()> {
        let mut state = lock(&self.state);
        state.status_updates += 1;
        if state.fail_on_status_update {
            return Err(ReconciliationError::RemoteSync(
                "order endpoint unavailable".to_string(),
            ));
        }
        match state.orders.get_mut(remote_order_id) {
            Some(order) => {
                order.1 = status;
                Ok(())
            }
            None => Err(ReconciliationError::RemoteSync(format!(
                "unknown remote order {remote_order_id}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(email: &str) -> CustomerProfile {
        CustomerProfile {
            first_name: "Ivan".to_string(),
            last_name: "Petrov".to_string(),
            email: email.to_string(),
            phone: "+79000000000".to_string(),
        }
    }

    fn request(key: &str, customer_id: RemoteCustomerId) -> RemoteOrderRequest {
        RemoteOrderRequest {
            idempotency_key: key.to_string(),
            customer_id,
            customer: profile("a@example.com"),
            lines: vec![],
            total: Money::from_minor_units(200),
            shipping_method: ShippingMethod::Pickup,
            shipping_address: None,
            comment: None,
            payment_reference: "label".to_string(),
            status: RemoteOrderStatus::Processing,
        }
    }

    #[tokio::test]
    async fn test_same_email_maps_to_same_customer() {
        let commerce = InMemoryCommerceSystem::new();
        let a = commerce.upsert_customer(&profile("a@example.com")).await.unwrap();
        let b = commerce.upsert_customer(&profile("a@example.com")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(commerce.customer_upserts(), 2);
    }

    #[tokio::test]
    async fn test_idempotency_key_deduplicates_orders() {
        let commerce = InMemoryCommerceSystem::new();
        let customer = commerce.upsert_customer(&profile("a@example.com")).await.unwrap();

        let first = commerce
            .create_remote_order(&request("order-1", customer.clone()))
            .await
            .unwrap();
        let again = commerce
            .create_remote_order(&request("order-1", customer))
            .await
            .unwrap();

        assert_eq!(first, again);
        assert_eq!(commerce.order_count(), 1);
        assert_eq!(commerce.order_creations(), 2);
    }

    #[tokio::test]
    async fn test_status_update_changes_the_order() {
        let commerce = InMemoryCommerceSystem::new();
        let customer = commerce.upsert_customer(&profile("a@example.com")).await.unwrap();
        let id = commerce
            .create_remote_order(&request("order-1", customer))
            .await
            .unwrap();

        commerce
            .update_remote_order_status(&id, RemoteOrderStatus::Cancelled)
            .await
            .unwrap();

        assert_eq!(commerce.order(&id).unwrap().1, RemoteOrderStatus::Cancelled);
        let missing = commerce
            .update_remote_order_status(&RemoteOrderId::new("nope"), RemoteOrderStatus::Cancelled)
            .await;
        assert!(missing.is_err());
    }
}
