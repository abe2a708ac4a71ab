//! Order listings: a user's order history and the admin feed of recent orders.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{Aggregate, Money, Order, OrderEvent, OrderState, RemoteOrderId, UserId};
use event_store::EventEnvelope;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Checkpoint, Projection};
use crate::read_model::ReadModel;

/// One row of an order listing.
#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub state: OrderState,
    pub total_amount: Money,
    pub line_count: usize,
    pub remote_order_id: Option<RemoteOrderId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct UserOrdersState {
    orders: HashMap<AggregateId, OrderSummary>,
    /// Order ids per user in creation order.
    by_user: HashMap<UserId, Vec<AggregateId>>,
    /// All order ids in creation order.
    created: Vec<AggregateId>,
    checkpoint: Checkpoint,
}

impl UserOrdersState {
    fn apply(&mut self, order_id: AggregateId, event: OrderEvent, at: DateTime<Utc>) {
        if let OrderEvent::OrderCreated(data) = event {
            self.orders.insert(
                order_id,
                OrderSummary {
                    order_id,
                    user_id: data.user_id,
                    state: OrderState::Pending,
                    total_amount: data.total_amount,
                    line_count: data.lines.len(),
                    remote_order_id: None,
                    created_at: data.created_at,
                    updated_at: data.created_at,
                },
            );
            self.by_user.entry(data.user_id).or_default().push(order_id);
            self.created.push(order_id);
            return;
        }

        let Some(summary) = self.orders.get_mut(&order_id) else {
            tracing::warn!(%order_id, "order event without a creation row");
            return;
        };

        match event {
            OrderEvent::AwaitingPayment(_) => summary.state = OrderState::AwaitingPayment,
            OrderEvent::PaymentSettled(_) => summary.state = OrderState::Paid,
            OrderEvent::RemoteOrderLinked(data) => {
                summary.remote_order_id = Some(data.remote_order_id)
            }
            OrderEvent::OrderSynced(_) => summary.state = OrderState::Synced,
            OrderEvent::OrderFailed(_) => summary.state = OrderState::Failed,
            OrderEvent::OrderCancelled(_) => summary.state = OrderState::Cancelled,
            _ => return,
        }
        summary.updated_at = at;
    }

    fn newest_first<'a>(
        &self,
        ids: impl DoubleEndedIterator<Item = &'a AggregateId>,
        limit: usize,
    ) -> Vec<OrderSummary> {
        ids.rev()
            .filter_map(|id| self.orders.get(id))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[derive(Clone)]
pub struct UserOrdersView {
    state: Arc<RwLock<UserOrdersState>>,
}

impl UserOrdersView {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(UserOrdersState {
                orders: HashMap::new(),
                by_user: HashMap::new(),
                created: Vec::new(),
                checkpoint: Checkpoint::start(),
            })),
        }
    }

    pub async fn get_order(&self, order_id: AggregateId) -> Option<OrderSummary> {
        self.state.read().await.orders.get(&order_id).cloned()
    }

    /// A user's orders, newest first.
    pub async fn orders_for_user(&self, user_id: UserId, limit: usize) -> Vec<OrderSummary> {
        let state = self.state.read().await;
        match state.by_user.get(&user_id) {
            Some(ids) => state.newest_first(ids.iter(), limit),
            None => Vec::new(),
        }
    }

    /// Orders across all users, newest first.
    pub async fn recent_orders(&self, limit: usize) -> Vec<OrderSummary> {
        let state = self.state.read().await;
        state.newest_first(state.created.iter(), limit)
    }
}

impl Default for UserOrdersView {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Projection for UserOrdersView {
    fn name(&self) -> &'static str {
        "UserOrdersView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;

        if event.aggregate_type == Order::aggregate_type() {
            let order_event: OrderEvent = event.decode()?;
            state.apply(event.aggregate_id, order_event, event.timestamp);
        }

        state.checkpoint = state.checkpoint.advance_to(event.position);
        Ok(())
    }

    async fn checkpoint(&self) -> Checkpoint {
        self.state.read().await.checkpoint
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.orders.clear();
        state.by_user.clear();
        state.created.clear();
        state.checkpoint = Checkpoint::start();
        Ok(())
    }
}

impl ReadModel for UserOrdersView {
    fn name(&self) -> &'static str {
        "UserOrdersView"
    }

    fn count(&self) -> usize {
        self.state.try_read().map(|s| s.orders.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use domain::DomainEvent;
    use domain::order::{
        AwaitingPaymentData, OrderCreatedData, OrderFailedData, RemoteOrderLinkedData,
    };
    use domain::{OrderLine, ProductId, RemoteCustomerId};
    use event_store::{Position, Version};

    use super::*;

    struct Feed {
        view: UserOrdersView,
        position: i64,
    }

    impl Feed {
        fn new() -> Self {
            Self {
                view: UserOrdersView::new(),
                position: 0,
            }
        }

        async fn push(&mut self, order_id: AggregateId, event: OrderEvent) {
            self.position += 1;
            let mut envelope = EventEnvelope::builder()
                .aggregate_id(order_id)
                .aggregate_type("Order")
                .event_type(event.event_type())
                .version(Version::new(self.position))
                .payload(&event)
                .unwrap()
                .build();
            envelope.position = Position::new(self.position);
            self.view.handle(&envelope).await.unwrap();
        }

        async fn create(&mut self, user: i64) -> AggregateId {
            let order_id = AggregateId::new();
            let line = OrderLine {
                product_id: ProductId::new("A"),
                name: "Tea".to_string(),
                model: "T-1".to_string(),
                quantity: 2,
                unit_price: Money::from_minor_units(100),
                options: Default::default(),
            };
            self.push(
                order_id,
                OrderEvent::OrderCreated(OrderCreatedData {
                    order_id,
                    user_id: UserId::new(user),
                    lines: vec![line],
                    total_amount: Money::from_minor_units(200),
                    checkout_key: AggregateId::new(),
                    created_at: Utc::now(),
                }),
            )
            .await;
            order_id
        }
    }

    #[tokio::test]
    async fn test_created_order_is_listed_for_its_user() {
        let mut feed = Feed::new();
        let order_id = feed.create(1).await;

        let orders = feed.view.orders_for_user(UserId::new(1), 10).await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_id, order_id);
        assert_eq!(orders[0].state, OrderState::Pending);
        assert_eq!(orders[0].total_amount, Money::from_minor_units(200));
        assert_eq!(orders[0].line_count, 1);

        assert!(feed.view.orders_for_user(UserId::new(2), 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_state_and_remote_link_follow_events() {
        let mut feed = Feed::new();
        let order_id = feed.create(1).await;

        feed.push(
            order_id,
            OrderEvent::AwaitingPayment(AwaitingPaymentData {
                redirect_url: "https://pay.example/x".to_string(),
                at: Utc::now(),
            }),
        )
        .await;
        feed.push(
            order_id,
            OrderEvent::RemoteOrderLinked(RemoteOrderLinkedData {
                remote_order_id: RemoteOrderId::new("r-10"),
                remote_customer_id: RemoteCustomerId::new("c-3"),
                linked_at: Utc::now(),
                compensation_required: false,
            }),
        )
        .await;

        let summary = feed.view.get_order(order_id).await.unwrap();
        assert_eq!(summary.state, OrderState::AwaitingPayment);
        assert_eq!(summary.remote_order_id, Some(RemoteOrderId::new("r-10")));

        feed.push(
            order_id,
            OrderEvent::OrderFailed(OrderFailedData {
                reason: "payment not received".to_string(),
                failed_at: Utc::now(),
            }),
        )
        .await;
        assert_eq!(
            feed.view.get_order(order_id).await.unwrap().state,
            OrderState::Failed
        );
    }

    #[tokio::test]
    async fn test_listings_are_newest_first_and_limited() {
        let mut feed = Feed::new();
        let first = feed.create(1).await;
        let second = feed.create(2).await;
        let third = feed.create(1).await;

        let mine = feed.view.orders_for_user(UserId::new(1), 10).await;
        let ids: Vec<_> = mine.iter().map(|o| o.order_id).collect();
        assert_eq!(ids, vec![third, first]);

        let recent = feed.view.recent_orders(2).await;
        let ids: Vec<_> = recent.iter().map(|o| o.order_id).collect();
        assert_eq!(ids, vec![third, second]);
        assert_eq!(ReadModel::count(&feed.view), 3);
    }

    #[tokio::test]
    async fn test_reset_clears_listings() {
        let mut feed = Feed::new();
        feed.create(1).await;

        feed.view.reset().await.unwrap();

        assert!(feed.view.recent_orders(10).await.is_empty());
        assert_eq!(feed.view.checkpoint().await, Checkpoint::start());
    }
}
