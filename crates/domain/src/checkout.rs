//! Duplicate-submission guard for checkout.
//!
//! A user tapping "checkout" twice, or two chat sessions submitting the same
//! cart at once, must yield one order. Each distinct (user, cart contents)
//! pair maps to one guard stream with a derived id; the first writer claims
//! it with an expect-new append and everyone else reads the claimed order id.

use chrono::{DateTime, Duration, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::order::{CartSnapshot, UserId};

/// Identity of one checkout attempt plus how long duplicates are folded into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutToken {
    key: AggregateId,
    user_id: UserId,
    window: Duration,
}

impl CheckoutToken {
    pub fn for_snapshot(snapshot: &CartSnapshot, window: Duration) -> Self {
        let natural_key = format!("user={};cart={}", snapshot.user_id, snapshot.fingerprint());
        Self {
            key: AggregateId::derived("checkout", &natural_key),
            user_id: snapshot.user_id,
            window,
        }
    }

    /// Guard stream id.
    pub fn key(&self) -> AggregateId {
        self.key
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Checkout guard has not been claimed")]
    NotClaimed,

    /// Someone else already pointed the guard at a different order.
    #[error("Checkout guard moved from {expected} to {actual}")]
    Moved {
        expected: AggregateId,
        actual: AggregateId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CheckoutGuardEvent {
    CheckoutClaimed(CheckoutClaimedData),
    CheckoutReopened(CheckoutReopenedData),
}

impl DomainEvent for CheckoutGuardEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CheckoutGuardEvent::CheckoutClaimed(_) => "CheckoutClaimed",
            CheckoutGuardEvent::CheckoutReopened(_) => "CheckoutReopened",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutClaimedData {
    pub guard_id: AggregateId,
    pub user_id: UserId,
    pub order_id: AggregateId,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutReopenedData {
    pub previous_order_id: AggregateId,
    pub order_id: AggregateId,
    pub claimed_at: DateTime<Utc>,
}

/// Points one checkout token at the order it produced.
#[derive(Debug, Clone, Default)]
pub struct CheckoutGuard {
    id: Option<AggregateId>,
    version: Version,
    user_id: Option<UserId>,
    order_id: Option<AggregateId>,
    claimed_at: Option<DateTime<Utc>>,
}

impl Aggregate for CheckoutGuard {
    type Event = CheckoutGuardEvent;
    type Error = GuardError;

    fn aggregate_type() -> &'static str {
        "CheckoutGuard"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            CheckoutGuardEvent::CheckoutClaimed(data) => {
                self.id = Some(data.guard_id);
                self.user_id = Some(data.user_id);
                self.order_id = Some(data.order_id);
                self.claimed_at = Some(data.claimed_at);
            }
            CheckoutGuardEvent::CheckoutReopened(data) => {
                self.order_id = Some(data.order_id);
                self.claimed_at = Some(data.claimed_at);
            }
        }
    }
}

impl CheckoutGuard {
    pub fn order_id(&self) -> Option<AggregateId> {
        self.order_id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        self.claimed_at
    }

    /// True while a repeat submission should be folded into the current order.
    pub fn is_within_window(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.claimed_at.is_some_and(|at| now - at < window)
    }

    /// Claims an unclaimed guard for `order_id`. A no-op once claimed.
    pub fn claim(
        &self,
        token: &CheckoutToken,
        order_id: AggregateId,
        now: DateTime<Utc>,
    ) -> Result<Vec<CheckoutGuardEvent>, GuardError> {
        if self.id.is_some() {
            return Ok(vec![]);
        }

        Ok(vec![CheckoutGuardEvent::CheckoutClaimed(
            CheckoutClaimedData {
                guard_id: token.key(),
                user_id: token.user_id(),
                order_id,
                claimed_at: now,
            },
        )])
    }

    /// Moves the guard from `previous` to a new order.
    pub fn reopen(
        &self,
        previous: AggregateId,
        order_id: AggregateId,
        now: DateTime<Utc>,
    ) -> Result<Vec<CheckoutGuardEvent>, GuardError> {
        let current = self.order_id.ok_or(GuardError::NotClaimed)?;
        if current != previous {
            return Err(GuardError::Moved {
                expected: previous,
                actual: current,
            });
        }

        Ok(vec![CheckoutGuardEvent::CheckoutReopened(
            CheckoutReopenedData {
                previous_order_id: previous,
                order_id,
                claimed_at: now,
            },
        )])
    }
}
