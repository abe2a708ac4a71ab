//! Payment bookkeeping attached to an order.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Money;

const LABEL_PREFIX: &str = "ord";

/// Reference the payment processor echoes back on settlement.
///
/// Formatted as `ord-<order id hex>-<nonce>`. The embedded order id lets a
/// processor callback find its order; the nonce keeps labels unique even if
/// an order is ever re-created under the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentLabel(String);

impl PaymentLabel {
    pub fn generate(order_id: AggregateId) -> Self {
        let nonce = Uuid::new_v4().simple().to_string();
        Self(format!("{LABEL_PREFIX}-{}-{}", order_id.simple(), &nonce[..8]))
    }

    /// Wraps a label received from outside. No format check is made.
    pub fn from_raw(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// The order id embedded in a well-formed label.
    pub fn order_id(&self) -> Option<AggregateId> {
        let mut parts = self.0.splitn(3, '-');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(LABEL_PREFIX), Some(id), Some(nonce)) if !nonce.is_empty() => {
                AggregateId::parse(id)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PaymentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of the latest settlement lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// No settlement yet, or the processor still reports it in progress.
    #[default]
    Pending,
    Success,
    /// Refused by the processor, or settled for the wrong amount.
    Unknown,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub label: PaymentLabel,
    pub requested_amount: Money,
    pub requested_at: DateTime<Utc>,
    pub status: PaymentStatus,
    pub redirect_url: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub check_count: u32,
    pub settled_amount: Option<Money>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl PaymentRecord {
    pub fn new(label: PaymentLabel, requested_amount: Money, requested_at: DateTime<Utc>) -> Self {
        Self {
            label,
            requested_amount,
            requested_at,
            status: PaymentStatus::Pending,
            redirect_url: None,
            last_checked_at: None,
            check_count: 0,
            settled_amount: None,
            settled_at: None,
        }
    }
}
