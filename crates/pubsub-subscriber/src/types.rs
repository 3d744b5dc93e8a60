//! Public types for the pubsub-subscriber crate.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Channel-name suffix the server uses for presence channels.
pub const PRESENCE_SUFFIX: &str = "-pnpres";

/// Suffix that marks a wildcard subscription (`sports.*`).
pub const WILDCARD_SUFFIX: &str = ".*";

// ---------------------------------------------------------------------------
// Timetoken / cursor
// ---------------------------------------------------------------------------

/// Server-assigned position cursor.
///
/// Zero means "no position yet": a poll with a zero timetoken is a handshake
/// that returns the current server position without any messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timetoken(pub u64);

impl Timetoken {
    pub const ZERO: Timetoken = Timetoken(0);

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Timetoken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Timetoken {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Timetoken)
    }
}

impl From<u64> for Timetoken {
    fn from(v: u64) -> Self {
        Timetoken(v)
    }
}

// Timetokens travel as decimal strings; 17-digit values lose precision in
// JavaScript clients when sent as numbers.
impl Serialize for Timetoken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timetoken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Str(String),
            Num(u64),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Str(s) => s.parse().map_err(serde::de::Error::custom),
            Repr::Num(n) => Ok(Timetoken(n)),
        }
    }
}

/// Timetoken plus the region hint the server returns with it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "t")]
    pub timetoken: Timetoken,
    #[serde(rename = "r", default)]
    pub region: Option<u32>,
}

impl Cursor {
    pub fn new(timetoken: impl Into<Timetoken>, region: Option<u32>) -> Self {
        Self {
            timetoken: timetoken.into(),
            region,
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription targets
// ---------------------------------------------------------------------------

/// What a [`Target`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TargetKind {
    Channel,
    ChannelGroup,
    Wildcard,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetKind::Channel => "channel",
            TargetKind::ChannelGroup => "group",
            TargetKind::Wildcard => "wildcard",
        })
    }
}

/// A channel, channel group or wildcard pattern, identified by `(kind, name)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target {
    kind: TargetKind,
    name: String,
}

impl Target {
    pub fn channel(name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Channel,
            name: name.into(),
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::ChannelGroup,
            name: name.into(),
        }
    }

    pub fn wildcard(pattern: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Wildcard,
            name: pattern.into(),
        }
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this target is a presence channel or presence group.
    pub fn is_presence(&self) -> bool {
        self.name.ends_with(PRESENCE_SUFFIX)
    }

    /// The presence twin of a channel or group (`lobby` → `lobby-pnpres`).
    ///
    /// Returns `None` for wildcards; presence for a wildcard is delivered on
    /// the matching concrete presence channels.
    pub fn with_presence(&self) -> Option<Target> {
        match self.kind {
            TargetKind::Wildcard => None,
            TargetKind::Channel | TargetKind::ChannelGroup if self.is_presence() => {
                Some(self.clone())
            }
            TargetKind::Channel | TargetKind::ChannelGroup => Some(Target {
                kind: self.kind,
                name: format!("{}{PRESENCE_SUFFIX}", self.name),
            }),
        }
    }

    /// Check the name against the server's naming rules.
    pub fn validate(&self) -> Result<(), Error> {
        let name = self.name.as_str();
        if name.is_empty() {
            return Err(Error::InvalidTarget(format!("empty {} name", self.kind)));
        }
        if let Some(c) = name
            .chars()
            .find(|c| matches!(c, ',' | '/') || c.is_whitespace())
        {
            return Err(Error::InvalidTarget(format!(
                "{} name {name:?} contains {c:?}",
                self.kind
            )));
        }
        match self.kind {
            TargetKind::Channel | TargetKind::ChannelGroup => {
                if name.contains('*') {
                    return Err(Error::InvalidTarget(format!(
                        "{} name {name:?} contains '*'; use a wildcard target",
                        self.kind
                    )));
                }
            }
            TargetKind::Wildcard => {
                let pattern = name.strip_suffix(PRESENCE_SUFFIX).unwrap_or(name);
                let stem = pattern.strip_suffix(WILDCARD_SUFFIX);
                if stem.is_none_or(|s| s.is_empty() || s.contains('*')) {
                    return Err(Error::InvalidTarget(format!(
                        "wildcard {name:?} must have the form <prefix>.*"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

// ---------------------------------------------------------------------------
// Events delivered to the consumer
// ---------------------------------------------------------------------------

/// What happened in a presence notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresenceAction {
    Join,
    Leave,
    Timeout,
    StateChange,
    Interval,
    #[serde(other)]
    Unknown,
}

/// Decoded presence payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Presence {
    pub action: PresenceAction,
    /// Subscriber the notification is about. Absent for `interval` events.
    pub uuid: Option<String>,
    /// Number of subscribers on the channel after the change.
    pub occupancy: u64,
    /// Server time in seconds since epoch.
    pub timestamp: Option<i64>,
    /// Presence state attached by the subscriber, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
}

/// A message or presence notification received on a subscribed target.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Concrete channel the event was published on.
    pub channel: String,
    /// Subscription that matched: the channel itself, a group, or a wildcard.
    pub subscription: Target,
    /// Publish timetoken of this event.
    pub timetoken: Timetoken,
    /// Payload as published.
    pub payload: serde_json::Value,
    /// Publisher's UUID, when the server reports it.
    pub publisher: Option<String>,
    /// Set for events received on a presence channel.
    pub presence: Option<Presence>,
}

impl Event {
    pub fn is_presence(&self) -> bool {
        self.presence.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    Connect,
    Disconnect,
    Reconnect,
}

impl fmt::Display for ConnectionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionAction::Connect => "connect",
            ConnectionAction::Disconnect => "disconnect",
            ConnectionAction::Reconnect => "reconnect",
        })
    }
}

/// Connection lifecycle notification for a set of targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub action: ConnectionAction,
    pub targets: Vec<Target>,
}

/// A failure surfaced to the consumer. Never fatal by itself.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorEvent {
    /// The server rejected a request.
    ServerSide {
        status: u16,
        message: String,
        payload: Option<serde_json::Value>,
    },
    /// A local failure: network, decode, retry budget exhausted.
    ClientSide { message: String },
}

impl ErrorEvent {
    pub fn client(message: impl Into<String>) -> Self {
        ErrorEvent::ClientSide {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ErrorEvent::ServerSide { message, .. } | ErrorEvent::ClientSide { message } => message,
        }
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorEvent::ServerSide {
                status, message, ..
            } => write!(f, "server error {status}: {message}"),
            ErrorEvent::ClientSide { message } => write!(f, "client error: {message}"),
        }
    }
}

/// Emitted when a poll returns nothing within the configured poll timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTimeout {
    /// Cursor the timed-out poll was issued with.
    pub timetoken: Timetoken,
    pub after: Duration,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server error: status={status}, {message}")]
    Server {
        status: u16,
        message: String,
        payload: Option<serde_json::Value>,
    },

    #[error("response decode error: {0}")]
    Decode(String),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("no tokio runtime: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

impl Error {
    /// Whether retrying the same request can never succeed.
    ///
    /// Server rejections in the 4xx range are permanent (bad key, forbidden,
    /// malformed request) except request timeout and rate limiting. Every
    /// client-side failure is treated as transient.
    pub fn is_permanent(&self) -> bool {
        match self {
            Error::Server { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            Error::InvalidTarget(_) | Error::Config(_) => true,
            Error::Http(_) | Error::Decode(_) | Error::Url(_) | Error::Runtime(_) => false,
        }
    }

    /// Convert into the event delivered on the error conduit.
    pub fn to_event(&self) -> ErrorEvent {
        match self {
            Error::Server {
                status,
                message,
                payload,
            } => ErrorEvent::ServerSide {
                status: *status,
                message: message.clone(),
                payload: payload.clone(),
            },
            other => ErrorEvent::client(other.to_string()),
        }
    }
}
