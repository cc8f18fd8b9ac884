use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lower bound on the registry refresh cadence.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);
/// Lower bound on the gate poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One status-aggregator endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    /// Aggregator base URL, e.g. `https://status.example.com`.
    pub base_url: String,

    /// API token sent as `X-Cachet-Token`.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Accept invalid TLS certificates (self-signed internal hosts).
    #[serde(default)]
    pub insecure_tls: bool,

    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl SourceConfig {
    /// Source at `base_url` with default settings.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
            insecure_tls: false,
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Request timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What a refresh does with a source that failed to fetch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnSourceFailure {
    /// Keep the source's last known resources.
    #[default]
    KeepStale,
    /// Keep the names but report them as `Unknown`.
    MarkUnknown,
}

/// Registry construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Sources in merge order; later sources win on name collisions.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Background refresh cadence in seconds. Clamped to [`MIN_REFRESH_INTERVAL`].
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Handling of sources that fail to fetch.
    #[serde(default)]
    pub on_source_failure: OnSourceFailure,
}

fn default_refresh_interval_secs() -> u64 {
    60
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sources: vec![],
            refresh_interval_secs: default_refresh_interval_secs(),
            on_source_failure: OnSourceFailure::default(),
        }
    }
}

impl RegistryConfig {
    /// Refresh cadence with the floor applied.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs).max(MIN_REFRESH_INTERVAL)
    }
}

/// Per-invocation gating policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOptions {
    /// Sleep between poll cycles. Clamped to [`MIN_POLL_INTERVAL`].
    pub poll_interval: Duration,
    /// Maximum total wait. `None` gates forever.
    pub max_wait: Option<Duration>,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_wait: None,
        }
    }
}

impl GateOptions {
    /// Sets a deadline.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Poll interval with the floor applied.
    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.max(MIN_POLL_INTERVAL)
    }
}
