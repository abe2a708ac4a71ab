//! Tunables for checkout, payment polling and remote sync.

use chrono::{DateTime, Duration, Utc};
use domain::UserId;

/// When automatic payment polling gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    /// Measured from the payment request.
    pub max_elapsed: Duration,
}

impl PollPolicy {
    /// True once `attempts` checks or `max_elapsed` since `requested_at` have passed.
    pub fn is_exhausted(
        &self,
        attempts: u32,
        requested_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        attempts >= self.max_attempts || now - requested_at >= self.max_elapsed
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            max_elapsed: Duration::hours(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub poll: PollPolicy,
    /// Deadline for every call to the catalog, cart, processor and commerce system.
    pub external_call_timeout: std::time::Duration,
    /// Repeat checkouts of the same cart inside this window fold into one order.
    pub duplicate_window: Duration,
    /// How long a remote sync claim blocks other syncs of the same order.
    pub sync_lease: Duration,
    pub sweep_interval: std::time::Duration,
    pub admin_ids: Vec<UserId>,
    /// Used to derive a customer email when the user gave none.
    pub fallback_email_domain: String,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            poll: PollPolicy::default(),
            external_call_timeout: std::time::Duration::from_secs(10),
            duplicate_window: Duration::seconds(30),
            sync_lease: Duration::seconds(120),
            sweep_interval: std::time::Duration::from_secs(60),
            admin_ids: Vec::new(),
            fallback_email_domain: "storefront.invalid".to_string(),
        }
    }
}
