//! Orders the background sweep still has to drive forward.
//!
//! An order is due while it waits on something outside this service: a
//! settlement (`awaiting_payment`), a remote copy (`paid`) or a remote
//! cancellation (`cancelled` with compensation pending). Orders leave the
//! queue once nothing more can happen to them automatically.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{Aggregate, Order, OrderEvent, OrderState};
use event_store::EventEnvelope;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Checkpoint, Projection};
use crate::read_model::ReadModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DueAction {
    VerifyPayment,
    SyncRemote,
    Compensate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DueOrder {
    pub order_id: AggregateId,
    pub action: DueAction,
    /// When the order entered the state that made it due.
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Entry {
    state: OrderState,
    compensation_pending: bool,
    since: DateTime<Utc>,
}

impl Entry {
    fn due_action(&self) -> Option<DueAction> {
        match self.state {
            OrderState::AwaitingPayment => Some(DueAction::VerifyPayment),
            OrderState::Paid => Some(DueAction::SyncRemote),
            OrderState::Cancelled if self.compensation_pending => Some(DueAction::Compensate),
            _ => None,
        }
    }
}

struct QueueState {
    entries: HashMap<AggregateId, Entry>,
    checkpoint: Checkpoint,
}

#[derive(Clone)]
pub struct ReconciliationQueue {
    state: Arc<RwLock<QueueState>>,
}

impl ReconciliationQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(QueueState {
                entries: HashMap::new(),
                checkpoint: Checkpoint::start(),
            })),
        }
    }

    /// Due orders, longest waiting first.
    pub async fn due_orders(&self) -> Vec<DueOrder> {
        let state = self.state.read().await;
        let mut due: Vec<DueOrder> = state
            .entries
            .iter()
            .filter_map(|(order_id, entry)| {
                entry.due_action().map(|action| DueOrder {
                    order_id: *order_id,
                    action,
                    since: entry.since,
                })
            })
            .collect();
        due.sort_by(|a, b| a.since.cmp(&b.since).then(a.order_id.cmp(&b.order_id)));
        due
    }

    pub async fn due_action(&self, order_id: AggregateId) -> Option<DueAction> {
        self.state
            .read()
            .await
            .entries
            .get(&order_id)
            .and_then(Entry::due_action)
    }
}

impl Default for ReconciliationQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(entries: &mut HashMap<AggregateId, Entry>, order_id: AggregateId, event: OrderEvent) {
    match event {
        // Checkouts nobody confirms never reach the queue.
        OrderEvent::AwaitingPayment(data) => {
            entries.insert(
                order_id,
                Entry {
                    state: OrderState::AwaitingPayment,
                    compensation_pending: false,
                    since: data.at,
                },
            );
        }
        OrderEvent::PaymentSettled(data) => {
            if let Some(entry) = entries.get_mut(&order_id) {
                entry.state = OrderState::Paid;
                entry.since = data.confirmed_at;
            }
        }
        OrderEvent::OrderSynced(_)
        | OrderEvent::OrderFailed(_)
        | OrderEvent::RemoteCompensated(_) => {
            entries.remove(&order_id);
        }
        OrderEvent::OrderCancelled(data) => {
            if data.compensation_required {
                // Synced orders already left the queue; cancellation brings them back.
                entries.insert(
                    order_id,
                    Entry {
                        state: OrderState::Cancelled,
                        compensation_pending: true,
                        since: data.cancelled_at,
                    },
                );
            } else {
                entries.remove(&order_id);
            }
        }
        OrderEvent::RemoteOrderLinked(data) if data.compensation_required => {
            // Linked after a cancellation; the remote copy still has to go.
            entries.insert(
                order_id,
                Entry {
                    state: OrderState::Cancelled,
                    compensation_pending: true,
                    since: data.linked_at,
                },
            );
        }
        OrderEvent::OrderCreated(_)
        | OrderEvent::PaymentRequested(_)
        | OrderEvent::PaymentChecked(_)
        | OrderEvent::RemoteSyncClaimed(_)
        | OrderEvent::RemoteSyncReleased(_)
        | OrderEvent::RemoteOrderLinked(_) => {}
    }
}

#[async_trait]
impl Projection for ReconciliationQueue {
    fn name(&self) -> &'static str {
        "ReconciliationQueue"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;

        if event.aggregate_type == Order::aggregate_type() {
            let order_event: OrderEvent = event.decode()?;
            apply(&mut state.entries, event.aggregate_id, order_event);
        }

        state.checkpoint = state.checkpoint.advance_to(event.position);
        Ok(())
    }

    async fn checkpoint(&self) -> Checkpoint {
        self.state.read().await.checkpoint
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.checkpoint = Checkpoint::start();
        Ok(())
    }
}

impl ReadModel for ReconciliationQueue {
    fn name(&self) -> &'static str {
        "ReconciliationQueue"
    }

    fn count(&self) -> usize {
        self.state
            .try_read()
            .map(|s| s.entries.values().filter(|e| e.due_action().is_some()).count())
            .unwrap_or(0)
    }
}
