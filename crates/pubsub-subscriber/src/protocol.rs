//! Wire protocol: request URLs, request signing, and JSON response decoding.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use sha2::Sha256;

use crate::config::ClientConfig;
use crate::types::{Cursor, Error, PresenceAction};

type HmacSha256 = Hmac<Sha256>;

pub(crate) const PNSDK: &str = concat!("pubsub-subscriber-rs/", env!("CARGO_PKG_VERSION"));

/// RFC 3986 unreserved characters stay as they are; everything else is escaped.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Body of a successful subscribe response.
///
/// Envelopes are kept as raw JSON so that one malformed envelope does not
/// fail the whole batch; see [`decode_envelope`].
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeResponse {
    #[serde(rename = "t")]
    pub cursor: Cursor,
    #[serde(rename = "m", default)]
    pub messages: Vec<serde_json::Value>,
}

/// One published message inside a subscribe response.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    /// Channel the message was published on.
    #[serde(rename = "c")]
    pub channel: String,
    /// Subscription that matched when it differs from the channel (group or
    /// wildcard pattern).
    #[serde(rename = "b", default)]
    pub subscription_match: Option<String>,
    #[serde(rename = "d", default)]
    pub payload: serde_json::Value,
    #[serde(rename = "i", default)]
    pub publisher: Option<String>,
    #[serde(rename = "p")]
    pub published: Cursor,
}

/// Payload of an envelope received on a presence channel.
#[derive(Debug, Clone, Deserialize)]
pub struct PresencePayload {
    pub action: PresenceAction,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub occupancy: u64,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Generic service response used for errors and administrative calls.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceResponse {
    pub status: Option<u16>,
    pub error: bool,
    pub message: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub service: Option<String>,
}

// ---------------------------------------------------------------------------
// Decode helpers
// ---------------------------------------------------------------------------

pub fn decode_subscribe(body: &[u8]) -> Result<SubscribeResponse, Error> {
    serde_json::from_slice(body).map_err(|e| Error::Decode(format!("subscribe response: {e}")))
}

pub fn decode_envelope(value: serde_json::Value) -> Result<Envelope, Error> {
    serde_json::from_value(value).map_err(|e| Error::Decode(format!("message envelope: {e}")))
}

pub fn decode_presence(value: &serde_json::Value) -> Result<PresencePayload, Error> {
    PresencePayload::deserialize(value)
        .map_err(|e| Error::Decode(format!("presence payload: {e}")))
}

/// Build an [`Error::Server`] from a non-2xx response.
///
/// The body is usually a JSON service response; anything else is carried as
/// the message verbatim.
pub fn server_error(status: u16, body: &[u8]) -> Error {
    match serde_json::from_slice::<ServiceResponse>(body) {
        Ok(resp) => Error::Server {
            status: resp.status.unwrap_or(status),
            message: resp
                .message
                .unwrap_or_else(|| format!("request failed with status {status}")),
            payload: resp.payload,
        },
        Err(_) => {
            let text = String::from_utf8_lossy(body).trim().to_string();
            Error::Server {
                status,
                message: if text.is_empty() {
                    format!("request failed with status {status}")
                } else {
                    text
                },
                payload: None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoint: URL construction + signing
// ---------------------------------------------------------------------------

/// Channel-group registry operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOp {
    Add(Vec<String>),
    Remove(Vec<String>),
    List,
    Delete,
}

/// Everything needed to address the server on behalf of one client.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    base: url::Url,
    subscribe_key: String,
    publish_key: String,
    secret_key: Option<String>,
    uuid: String,
    presence_timeout: Option<u32>,
}

impl Endpoint {
    pub(crate) fn new(config: &ClientConfig, uuid: String) -> Result<Self, Error> {
        let base = url::Url::parse(&format!("{}://{}/", config.scheme(), config.origin))?;
        if base.cannot_be_a_base() {
            return Err(Error::Config(format!("invalid origin {:?}", config.origin)));
        }
        Ok(Self {
            base,
            subscribe_key: config.subscribe_key.clone(),
            publish_key: config.publish_key.clone().unwrap_or_default(),
            secret_key: config.secret_key.clone(),
            uuid,
            presence_timeout: config.presence_timeout,
        })
    }

    pub(crate) fn uuid(&self) -> &str {
        &self.uuid
    }

    /// `GET /v2/subscribe/{sub_key}/{channels}/0?tt=..&tr=..&channel-group=..`
    pub(crate) fn subscribe_url(
        &self,
        channels: &[String],
        groups: &[String],
        cursor: Cursor,
    ) -> Result<url::Url, Error> {
        // The server expects a literal "," when only groups are subscribed.
        let channel_path = if channels.is_empty() {
            ",".to_string()
        } else {
            channels.join(",")
        };
        let mut params = vec![("tt".to_string(), cursor.timetoken.to_string())];
        if let Some(region) = cursor.region
            && !cursor.timetoken.is_zero()
        {
            params.push(("tr".to_string(), region.to_string()));
        }
        if !groups.is_empty() {
            params.push(("channel-group".to_string(), groups.join(",")));
        }
        if let Some(heartbeat) = self.presence_timeout {
            params.push(("heartbeat".to_string(), heartbeat.to_string()));
        }
        self.build(
            &[
                "v2",
                "subscribe",
                self.subscribe_key.as_str(),
                channel_path.as_str(),
                "0",
            ],
            params,
        )
    }

    /// `/v1/channel-registration/sub-key/{sub_key}/channel-group/{group}[/remove]`
    pub(crate) fn channel_group_url(&self, group: &str, op: &GroupOp) -> Result<url::Url, Error> {
        let mut segments = vec![
            "v1",
            "channel-registration",
            "sub-key",
            self.subscribe_key.as_str(),
            "channel-group",
            group,
        ];
        let mut params = Vec::new();
        match op {
            GroupOp::Add(channels) => params.push(("add".to_string(), channels.join(","))),
            GroupOp::Remove(channels) => params.push(("remove".to_string(), channels.join(","))),
            GroupOp::List => {}
            GroupOp::Delete => segments.push("remove"),
        }
        self.build(&segments, params)
    }

    fn build(&self, segments: &[&str], mut params: Vec<(String, String)>) -> Result<url::Url, Error> {
        let mut u = self.base.clone();
        u.path_segments_mut()
            .map_err(|()| Error::Config("origin cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);

        params.push(("uuid".to_string(), self.uuid.clone()));
        params.push(("pnsdk".to_string(), PNSDK.to_string()));

        if let Some(secret) = self.secret_key.as_deref() {
            params.push(("timestamp".to_string(), unix_now_secs().to_string()));
            let query = canonical_query(&params);
            let signature = sign(secret, &self.publish_key, u.path(), &query)?;
            params.push(("signature".to_string(), signature));
        }

        u.set_query(Some(&canonical_query(&params)));
        Ok(u)
    }
}

/// Sorted, percent-encoded query string. The same text is sent and signed.
fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();
    sorted
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, QUERY_VALUE),
                utf8_percent_encode(v, QUERY_VALUE)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// `v2.` + URL-safe unpadded base64 of HMAC-SHA256 over
/// `GET\n{publish_key}\n{path}\n{query}\n`.
fn sign(secret: &str, publish_key: &str, path: &str, query: &str) -> Result<String, Error> {
    let input = format!("GET\n{publish_key}\n{path}\n{query}\n");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Config(format!("secret key: {e}")))?;
    mac.update(input.as_bytes());
    let digest = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("v2.{digest}"))
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
