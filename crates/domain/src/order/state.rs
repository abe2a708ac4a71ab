//! Order lifecycle states.

use serde::{Deserialize, Serialize};

/// Where an order is in its lifecycle.
///
/// ```text
/// pending ──► awaiting_payment ──► paid ──► synced
///    │               │   │           │        ┆ (admin)
///    │               │   └─► failed  │        ┆
///    └───────────────┴───────────────┴──► cancelled
/// ```
///
/// `synced`, `cancelled` and `failed` are terminal for the automatic
/// reconciliation flow. An administrator may still cancel a `synced` order,
/// which compensates the remote order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Snapshot persisted, waiting for the user to confirm checkout.
    #[default]
    Pending,

    /// A payable request exists at the processor.
    AwaitingPayment,

    /// Settlement confirmed for the frozen total.
    Paid,

    /// Recorded in the commerce system.
    Synced,

    Cancelled,

    /// Payment never settled within the polling bound.
    Failed,
}

impl OrderState {
    /// Returns true if `next` is reachable from this state in one step.
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        use OrderState::*;

        matches!(
            (self, next),
            (Pending, AwaitingPayment)
                | (AwaitingPayment, Paid)
                | (Paid, Synced)
                | (AwaitingPayment, Failed)
                | (Pending | AwaitingPayment | Paid, Cancelled)
                | (Synced, Cancelled)
        )
    }

    /// Returns true if the automatic flow has nothing left to do.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Synced | OrderState::Cancelled | OrderState::Failed
        )
    }

    /// Returns true once settlement has been observed.
    pub fn is_paid(&self) -> bool {
        matches!(self, OrderState::Paid | OrderState::Synced)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "pending",
            OrderState::AwaitingPayment => "awaiting_payment",
            OrderState::Paid => "paid",
            OrderState::Synced => "synced",
            OrderState::Cancelled => "cancelled",
            OrderState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
