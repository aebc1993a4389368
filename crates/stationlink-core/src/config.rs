// ── Runtime configuration ──
//
// These types describe *how* to reach the telemetry server and how long
// cached data stays trustworthy. They never touch disk; the config crate
// or an embedding application builds them and hands them in.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// Address of the production telemetry server on the plant network.
pub const DEFAULT_SERVER_URL: &str = "ws://10.200.0.184:8765";

/// Everything the connection manager needs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: Url,
    pub reconnect: ReconnectPolicy,
    pub outbox: OutboxConfig,
}

impl ClientConfig {
    /// Default tuning for the given server.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            reconnect: ReconnectPolicy::default(),
            outbox: OutboxConfig::default(),
        }
    }
}

/// Exponential backoff after an unexpected close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt. Default: 5s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,

    /// Attempts before giving up on the fast schedule.
    /// `None` means retry forever. Default: 5.
    pub max_attempts: Option<u32>,

    /// After giving up, one more attempt (with a fresh counter) is made
    /// after this delay. Default: 5 minutes.
    pub final_attempt_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            max_attempts: Some(5),
            final_attempt_delay: Duration::from_secs(300),
        }
    }
}

/// Commands issued while the socket is still opening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxConfig {
    /// Maximum queued commands. Default: 32.
    pub capacity: usize,

    /// A queued command older than this is dropped instead of sent.
    /// Default: 1.5s.
    pub max_wait: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            max_wait: Duration::from_millis(1500),
        }
    }
}

/// Local station cache tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Snapshot file. `None` keeps the cache in memory only.
    pub path: Option<PathBuf>,

    /// Records older than this are treated as absent. Default: 24h.
    pub max_age: Duration,

    /// Ring buffer size for received messages. Default: 1000.
    pub max_messages: usize,

    /// Newest messages written to the snapshot. Default: 100.
    pub persisted_messages: usize,

    /// How often the background sweep runs. Default: 1h.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_age: Duration::from_secs(24 * 60 * 60),
            max_messages: 1000,
            persisted_messages: 100,
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}
