//! Reconnection controller: connection state and retry/backoff decisions.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::TimingConfig;
use crate::types::ConnectionAction;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No poll has succeeded yet.
    Disconnected,
    Connected,
    /// Polls are failing; retrying with backoff.
    Reconnecting,
    /// Terminal. No more polls, no more events.
    Stopped,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Stopped => "stopped",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
    pub jitter: Duration,
}

impl From<&TimingConfig> for RetryPolicy {
    fn from(t: &TimingConfig) -> Self {
        Self {
            initial: t.initial_retry_interval,
            max: t.max_retry_interval,
            max_attempts: t.max_retry_attempts,
            jitter: t.retry_jitter,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        // Exponential backoff: 1s, 2s, 4s, 8s, 15s, 15s, ...
        let exp = attempt.saturating_sub(1).min(30);
        self.initial.saturating_mul(1u32 << exp).min(self.max)
    }

    fn jitter_sample(&self) -> Duration {
        let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        // Use subsecond nanos from wall clock for non-deterministic jitter
        let nanos = u64::from(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos(),
        );
        Duration::from_millis(nanos % max_ms)
    }
}

/// Why a session stopped on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The server rejected the subscription in a way retries cannot fix.
    Permanent,
    /// The retry ceiling was reached.
    RetriesExhausted { attempts: u32 },
    /// The caller stopped the session.
    Requested,
}

/// What the session should do after a failed poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    Retry {
        attempt: u32,
        delay: Duration,
        /// Emit `Disconnect`: the session was connected until now.
        announce_disconnect: bool,
    },
    Stop(StopReason),
}

/// The state machine. Pure: the session performs the side effects.
#[derive(Debug, Clone)]
pub struct ReconnectController {
    state: ConnectionState,
    attempts: u32,
    ever_connected: bool,
    policy: RetryPolicy,
}

impl ReconnectController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            ever_connected: false,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// A poll returned a batch. Returns the lifecycle notification to emit,
    /// if the state changed.
    pub fn on_success(&mut self) -> Option<ConnectionAction> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Stopped => None,
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {
                let action = if self.ever_connected {
                    ConnectionAction::Reconnect
                } else {
                    ConnectionAction::Connect
                };
                self.state = ConnectionState::Connected;
                self.attempts = 0;
                self.ever_connected = true;
                Some(action)
            }
        }
    }

    /// A poll failed.
    pub fn on_error(&mut self, permanent: bool) -> Recovery {
        if self.state == ConnectionState::Stopped {
            return Recovery::Stop(StopReason::Requested);
        }
        if permanent {
            self.state = ConnectionState::Stopped;
            return Recovery::Stop(StopReason::Permanent);
        }

        let announce_disconnect = self.state == ConnectionState::Connected;
        self.attempts = if announce_disconnect {
            1
        } else {
            self.attempts.saturating_add(1)
        };
        if self.attempts > self.policy.max_attempts {
            self.state = ConnectionState::Stopped;
            return Recovery::Stop(StopReason::RetriesExhausted {
                attempts: self.policy.max_attempts,
            });
        }

        self.state = ConnectionState::Reconnecting;
        Recovery::Retry {
            attempt: self.attempts,
            delay: self
                .policy
                .backoff(self.attempts)
                .saturating_add(self.policy.jitter_sample()),
            announce_disconnect,
        }
    }

    /// Caller-initiated stop.
    pub fn stop(&mut self) {
        self.state = ConnectionState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(15),
            max_attempts,
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn initial_state_is_disconnected() {
        let c = ReconnectController::new(policy(3));
        assert_eq!(c.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn first_success_connects_once() {
        let mut c = ReconnectController::new(policy(3));
        assert_eq!(c.on_success(), Some(ConnectionAction::Connect));
        assert_eq!(c.state(), ConnectionState::Connected);
        assert_eq!(c.on_success(), None);
        assert_eq!(c.on_success(), None);
    }

    #[test]
    fn error_while_connected_announces_disconnect_then_reconnects() {
        let mut c = ReconnectController::new(policy(3));
        c.on_success();
        match c.on_error(false) {
            Recovery::Retry {
                attempt,
                delay,
                announce_disconnect,
            } => {
                assert_eq!(attempt, 1);
                assert_eq!(delay, Duration::from_secs(1));
                assert!(announce_disconnect);
            }
            other => panic!("expected Retry, got {other:?}"),
        }
        assert_eq!(c.state(), ConnectionState::Reconnecting);

        // Second failure does not announce again
        assert!(matches!(
            c.on_error(false),
            Recovery::Retry {
                attempt: 2,
                announce_disconnect: false,
                ..
            }
        ));

        assert_eq!(c.on_success(), Some(ConnectionAction::Reconnect));
        assert_eq!(c.state(), ConnectionState::Connected);
    }

    #[test]
    fn errors_before_first_connect_do_not_announce() {
        let mut c = ReconnectController::new(policy(3));
        assert!(matches!(
            c.on_error(false),
            Recovery::Retry {
                announce_disconnect: false,
                ..
            }
        ));
        assert_eq!(c.on_success(), Some(ConnectionAction::Connect));
    }

    #[test]
    fn retry_budget_exhaustion_stops() {
        let mut c = ReconnectController::new(policy(2));
        c.on_success();
        assert!(matches!(c.on_error(false), Recovery::Retry { attempt: 1, .. }));
        assert!(matches!(c.on_error(false), Recovery::Retry { attempt: 2, .. }));
        assert_eq!(
            c.on_error(false),
            Recovery::Stop(StopReason::RetriesExhausted { attempts: 2 })
        );
        assert_eq!(c.state(), ConnectionState::Stopped);
        assert_eq!(c.on_success(), None);
    }

    #[test]
    fn attempts_reset_after_recovery() {
        let mut c = ReconnectController::new(policy(2));
        c.on_success();
        c.on_error(false);
        c.on_error(false);
        c.on_success();
        assert!(matches!(c.on_error(false), Recovery::Retry { attempt: 1, .. }));
    }

    #[test]
    fn permanent_error_bypasses_retry() {
        let mut c = ReconnectController::new(policy(10));
        c.on_success();
        assert_eq!(c.on_error(true), Recovery::Stop(StopReason::Permanent));
        assert_eq!(c.state(), ConnectionState::Stopped);
    }

    #[test]
    fn stopped_is_terminal() {
        let mut c = ReconnectController::new(policy(10));
        c.stop();
        assert_eq!(c.on_success(), None);
        assert_eq!(c.on_error(false), Recovery::Stop(StopReason::Requested));
        assert_eq!(c.state(), ConnectionState::Stopped);
    }

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let p = policy(40);
        let delays: Vec<u64> = (1..=7).map(|a| p.backoff(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 15, 15, 15]);
        assert_eq!(p.backoff(1000), Duration::from_secs(15));
    }

    #[test]
    fn jitter_stays_below_bound() {
        let mut p = policy(1);
        p.jitter = Duration::from_millis(250);
        for _ in 0..20 {
            assert!(p.jitter_sample() < Duration::from_millis(250));
        }
        p.jitter = Duration::ZERO;
        assert_eq!(p.jitter_sample(), Duration::ZERO);
    }

    #[test]
    fn huge_ceiling_saturates_instead_of_overflowing() {
        let mut c = ReconnectController::new(RetryPolicy {
            initial: Duration::MAX,
            max: Duration::MAX,
            max_attempts: 3,
            jitter: Duration::from_secs(1),
        });
        c.on_success();
        match c.on_error(false) {
            Recovery::Retry { delay, .. } => assert_eq!(delay, Duration::MAX),
            other => panic!("expected Retry, got {other:?}"),
        }
    }
}
