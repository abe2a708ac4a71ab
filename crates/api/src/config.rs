//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use domain::UserId;
use reconciliation::{PollPolicy, ReconciliationConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Server and reconciliation configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` / `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `json` for structured output, anything else for text
/// - `DATABASE_URL`: PostgreSQL event store; in-memory when unset
/// - `PAYMENT_POLL_MAX_ATTEMPTS` (30), `PAYMENT_POLL_MAX_ELAPSED_SECS` (3600)
/// - `SWEEP_INTERVAL_SECS` (60), `EXTERNAL_CALL_TIMEOUT_MS` (10000)
/// - `CHECKOUT_DUPLICATE_WINDOW_SECS` (30), `SYNC_LEASE_SECS` (120)
/// - `ADMIN_IDS`: comma separated user ids
/// - `FALLBACK_EMAIL_DOMAIN`: domain for derived customer emails
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub poll_max_attempts: u32,
    pub poll_max_elapsed_secs: i64,
    pub sweep_interval_secs: u64,
    pub external_call_timeout_ms: u64,
    pub duplicate_window_secs: i64,
    pub sync_lease_secs: i64,
    pub admin_ids: Vec<UserId>,
    pub fallback_email_domain: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parsed(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => defaults.log_format,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            poll_max_attempts: parsed(&lookup, "PAYMENT_POLL_MAX_ATTEMPTS")
                .unwrap_or(defaults.poll_max_attempts),
            poll_max_elapsed_secs: parsed(&lookup, "PAYMENT_POLL_MAX_ELAPSED_SECS")
                .unwrap_or(defaults.poll_max_elapsed_secs),
            sweep_interval_secs: parsed(&lookup, "SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.sweep_interval_secs),
            external_call_timeout_ms: parsed(&lookup, "EXTERNAL_CALL_TIMEOUT_MS")
                .unwrap_or(defaults.external_call_timeout_ms),
            duplicate_window_secs: parsed(&lookup, "CHECKOUT_DUPLICATE_WINDOW_SECS")
                .unwrap_or(defaults.duplicate_window_secs),
            sync_lease_secs: parsed(&lookup, "SYNC_LEASE_SECS")
                .unwrap_or(defaults.sync_lease_secs),
            admin_ids: lookup("ADMIN_IDS")
                .map(|raw| parse_admin_ids(&raw))
                .unwrap_or(defaults.admin_ids),
            fallback_email_domain: lookup("FALLBACK_EMAIL_DOMAIN")
                .unwrap_or(defaults.fallback_email_domain),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn reconciliation_config(&self) -> ReconciliationConfig {
        ReconciliationConfig {
            poll: PollPolicy {
                max_attempts: self.poll_max_attempts,
                max_elapsed: chrono::Duration::seconds(self.poll_max_elapsed_secs),
            },
            external_call_timeout: Duration::from_millis(self.external_call_timeout_ms),
            duplicate_window: chrono::Duration::seconds(self.duplicate_window_secs),
            sync_lease: chrono::Duration::seconds(self.sync_lease_secs),
            sweep_interval: self.sweep_interval(),
            admin_ids: self.admin_ids.clone(),
            fallback_email_domain: self.fallback_email_domain.clone(),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

/// Ignores entries that are not integers.
fn parse_admin_ids(raw: &str) -> Vec<UserId> {
    raw.split(',')
        .filter_map(|part| part.trim().parse::<i64>().ok())
        .map(UserId::new)
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        let reconciliation = ReconciliationConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            poll_max_attempts: reconciliation.poll.max_attempts,
            poll_max_elapsed_secs: reconciliation.poll.max_elapsed.num_seconds(),
            sweep_interval_secs: reconciliation.sweep_interval.as_secs(),
            external_call_timeout_ms: reconciliation.external_call_timeout.as_millis() as u64,
            duplicate_window_secs: reconciliation.duplicate_window.num_seconds(),
            sync_lease_secs: reconciliation.sync_lease.num_seconds(),
            admin_ids: reconciliation.admin_ids,
            fallback_email_domain: reconciliation.fallback_email_domain,
        }
    }
}
