//! Client configuration.

use std::time::Duration;

use crate::types::Error;

pub(crate) const DEFAULT_ORIGIN: &str = "ps.pndsn.com";
pub(crate) const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(310);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const INITIAL_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(15);
const MAX_RETRY_ATTEMPTS: u32 = 40; // ~10 min of retries at the capped interval
const RETRY_JITTER: Duration = Duration::from_secs(1);

/// Timing knobs. The defaults suit production; tests shrink them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    /// How long a single long-poll may stay open before it counts as a timeout.
    /// The server answers an idle poll after ~280 s, so keep this above that.
    pub poll_timeout: Duration,
    /// TCP/TLS connect timeout for every request.
    pub connect_timeout: Duration,
    /// Whole-request timeout for administrative calls.
    pub request_timeout: Duration,
    /// First reconnect delay; doubles per attempt.
    pub initial_retry_interval: Duration,
    /// Ceiling for the reconnect delay.
    pub max_retry_interval: Duration,
    /// Reconnect attempts before the session gives up.
    pub max_retry_attempts: u32,
    /// Upper bound of the random delay added to each reconnect.
    pub retry_jitter: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            initial_retry_interval: INITIAL_RETRY_INTERVAL,
            max_retry_interval: MAX_RETRY_INTERVAL,
            max_retry_attempts: MAX_RETRY_ATTEMPTS,
            retry_jitter: RETRY_JITTER,
        }
    }
}

/// Configuration for [`Client::new`](crate::Client::new).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Key identifying the keyset to subscribe on. Required.
    pub subscribe_key: String,
    /// Publish key; only used when signing requests.
    pub publish_key: Option<String>,
    /// Secret key. When set, every request is signed.
    pub secret_key: Option<String>,
    /// Accepted for compatibility; payloads are delivered undecrypted.
    pub cipher_key: Option<String>,
    /// Use `https` instead of `http`.
    pub ssl: bool,
    /// Identity of this subscriber. A random v4 UUID is used when `None`.
    pub uuid: Option<String>,
    /// Server host, optionally with port. Defaults to `ps.pndsn.com`.
    pub origin: String,
    /// Presence heartbeat timeout in seconds sent with each poll.
    pub presence_timeout: Option<u32>,
    pub timing: TimingConfig,
}

impl ClientConfig {
    pub fn new(subscribe_key: impl Into<String>) -> Self {
        Self {
            subscribe_key: subscribe_key.into(),
            publish_key: None,
            secret_key: None,
            cipher_key: None,
            ssl: true,
            uuid: None,
            origin: DEFAULT_ORIGIN.to_string(),
            presence_timeout: None,
            timing: TimingConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.subscribe_key.trim().is_empty() {
            return Err(Error::Config("subscribe key is required".to_string()));
        }
        if self.origin.trim().is_empty() {
            return Err(Error::Config("origin must not be empty".to_string()));
        }
        if self.timing.poll_timeout.is_zero() {
            return Err(Error::Config("poll timeout must be non-zero".to_string()));
        }
        if self.timing.max_retry_attempts == 0 {
            return Err(Error::Config(
                "retry ceiling must allow at least one attempt".to_string(),
            ));
        }
        if self.uuid.as_deref().is_some_and(|u| u.trim().is_empty()) {
            return Err(Error::Config("uuid must not be blank".to_string()));
        }
        Ok(())
    }

    pub(crate) fn scheme(&self) -> &'static str {
        if self.ssl { "https" } else { "http" }
    }
}
