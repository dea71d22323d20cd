pub mod api;
pub mod blob;
pub mod catalog;
pub mod http_util;
pub mod retry;
pub mod url_pool;


use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for catalog and blob operations.
///
/// `max_attempts` counts total tries, not re-tries; the catalog backoff is a
/// fixed delay between attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> usize {
    4
}

fn default_backoff_ms() -> u64 {
    3000
}

/// HTTP agent settings shared by the URL pool, blob putter and catalog
/// client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Dial timeout; a host that cannot be reached this fast is treated
    /// as offline.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Bound on a single request body transfer in either direction.
    /// Full-size videos over a slow uplink legitimately take minutes; the
    /// worker's overall upload deadline caps the total.
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    20
}

fn default_transfer_timeout_secs() -> u64 {
    10 * 60
}

/// Build the blocking HTTP agent all remote calls share.
pub fn build_agent(http: &HttpConfig) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(http.connect_timeout_secs))
        .timeout_read(Duration::from_secs(http.transfer_timeout_secs))
        .timeout_write(Duration::from_secs(http.transfer_timeout_secs))
        .build()
}
