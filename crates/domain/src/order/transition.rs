use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Actor, Money, OrderState};

/// A state change requested through the ledger's compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// `pending -> awaiting_payment`
    AwaitPayment { redirect_url: String },

    /// `awaiting_payment -> paid`
    MarkPaid {
        amount: Money,
        settled_at: DateTime<Utc>,
    },

    /// `paid -> synced`
    MarkSynced,

    /// `awaiting_payment -> failed`
    Fail { reason: String },

    /// `* -> cancelled`
    Cancel { actor: Actor, reason: String },
}

impl Transition {
    /// State the order is in after this transition.
    pub fn target(&self) -> OrderState {
        match self {
            Transition::AwaitPayment { .. } => OrderState::AwaitingPayment,
            Transition::MarkPaid { .. } => OrderState::Paid,
            Transition::MarkSynced => OrderState::Synced,
            Transition::Fail { .. } => OrderState::Failed,
            Transition::Cancel { .. } => OrderState::Cancelled,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transition::AwaitPayment { .. } => "await_payment",
            Transition::MarkPaid { .. } => "mark_paid",
            Transition::MarkSynced => "mark_synced",
            Transition::Fail { .. } => "fail",
            Transition::Cancel { .. } => "cancel",
        }
    }
}
