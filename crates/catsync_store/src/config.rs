//! Configuration for store access.

use crate::error::{StoreError, StoreResult};
use crate::record::fields;
use std::time::Duration;
use tracing::warn;

/// Configuration for one store endpoint.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL, e.g. `https://esgf-node.example.org/solr`, without a trailing slash.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Field holding the ordering key.
    pub timestamp_field: String,
}

impl StoreConfig {
    /// Creates a configuration, validating the base URL.
    pub fn new(base_url: impl Into<String>) -> StoreResult<Self> {
        let base_url = validate_base_url(&base_url.into())?;
        Ok(Self {
            base_url,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            timestamp_field: fields::TIMESTAMP.to_string(),
        })
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the ordering-key field.
    pub fn with_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.timestamp_field = field.into();
        self
    }

    /// Host part of the base URL.
    pub fn host(&self) -> &str {
        host_of(&self.base_url)
    }
}

/// Configuration for federation discovery.
#[derive(Debug, Clone)]
pub struct FederationConfig {
    /// Search endpoint of any registry node.
    pub registry_url: String,
    /// Store URL template for a discovered node; `{node}` is replaced by the host.
    pub node_url_template: String,
    /// Nodes never treated as remotes.
    pub exclude_nodes: Vec<String>,
    /// Store settings applied to every discovered node.
    pub store: StoreConfig,
}

impl FederationConfig {
    /// Creates a federation configuration.
    pub fn new(registry_url: impl Into<String>, store: StoreConfig) -> StoreResult<Self> {
        Ok(Self {
            registry_url: validate_base_url(&registry_url.into())?,
            node_url_template: "https://{node}/solr".to_string(),
            exclude_nodes: Vec::new(),
            store,
        })
    }

    /// Sets the node URL template.
    pub fn with_node_url_template(mut self, template: impl Into<String>) -> Self {
        self.node_url_template = template.into();
        self
    }

    /// Adds a node that must not be queried as a remote.
    pub fn exclude_node(mut self, node: impl Into<String>) -> Self {
        self.exclude_nodes.push(node.into());
        self
    }

    /// Store URL for a node host.
    pub fn node_url(&self, node: &str) -> String {
        self.node_url_template.replace("{node}", node)
    }
}

/// How often, and how patiently, a failed request is repeated.
///
/// Only errors for which [`StoreError::is_retryable`] holds are repeated.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts per request, the first included.
    pub max_attempts: u32,
    /// Pause before the second attempt.
    pub pause: Duration,
    /// Factor applied to the pause after every further failure.
    pub growth: f64,
    /// Upper bound on any single pause.
    pub max_pause: Duration,
}

impl RetryConfig {
    /// `max_attempts` attempts with a fixed one-second pause.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            pause: Duration::from_secs(1),
            growth: 1.0,
            max_pause: Duration::from_secs(30),
        }
    }

    /// A single attempt.
    pub fn no_retry() -> Self {
        Self::new(1).with_pause(Duration::ZERO)
    }

    /// Sets the pause before the second attempt.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Grows the pause by `growth` after each failure, up to `max_pause`.
    pub fn with_growth(mut self, growth: f64, max_pause: Duration) -> Self {
        self.growth = growth.max(1.0);
        self.max_pause = max_pause;
        self
    }

    /// Pause before attempt `attempt` (0 is the first attempt).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match attempt {
            0 => Duration::ZERO,
            n => {
                let cap = self.max_pause.max(self.pause).as_secs_f64();
                let steps = n.saturating_sub(1).min(64) as i32;
                let grown = self.pause.as_secs_f64() * self.growth.powi(steps);
                Duration::from_secs_f64(grown.min(cap))
            }
        }
    }

    /// Runs `op` until it succeeds, fails for good, or attempts run out.
    pub fn run<T>(
        &self,
        endpoint: &str,
        what: &str,
        mut op: impl FnMut() -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                std::thread::sleep(self.delay_for_attempt(attempt));
            }
            match op() {
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    warn!(endpoint, attempt, "{what} failed, retrying: {err}");
                }
                result => return result,
            }
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Checks that a URL has an http(s) scheme and a host; trims trailing slashes.
pub fn validate_base_url(url: &str) -> StoreResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    let rest = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .ok_or_else(|| StoreError::InvalidEndpoint(format!("'{url}' is not an http(s) URL")))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(StoreError::InvalidEndpoint(format!("'{url}' has no host")));
    }
    Ok(trimmed.to_string())
}

/// Host (with port) of an http(s) URL, or the input when it has no scheme.
pub fn host_of(url: &str) -> &str {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url);
    rest.split(['/', '?', '#']).next().unwrap_or(rest)
}
