//! Long-poll transport: one outstanding subscribe request at a time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::protocol::{self, Endpoint, SubscribeResponse};
use crate::subscription_set::SetSnapshot;
use crate::types::{Cursor, Error};

/// What a single poll produced.
#[derive(Debug)]
pub enum PollOutcome {
    /// The server answered with a (possibly empty) batch and the next cursor.
    Batch(SubscribeResponse),
    /// Nothing arrived within the poll timeout. Not a failure.
    Timeout,
}

/// Inputs of one poll: the set as it was when the poll began, and the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
    pub channels: Vec<String>,
    pub groups: Vec<String>,
    pub cursor: Cursor,
}

impl PollRequest {
    pub fn new(snapshot: &SetSnapshot, cursor: Cursor) -> Self {
        Self {
            channels: snapshot.channel_names(),
            groups: snapshot.group_names(),
            cursor,
        }
    }
}

/// Something that can long-poll for a subscription batch.
///
/// Implementations must be cancel-safe: the session drops the future when the
/// set changes or the session stops, and that must release the request.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn poll(&self, request: &PollRequest) -> Result<PollOutcome, Error>;
}

/// HTTP long-poll against the subscribe endpoint.
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: Arc<Endpoint>,
    poll_timeout: Duration,
}

impl HttpTransport {
    pub(crate) fn new(http: reqwest::Client, endpoint: Arc<Endpoint>, poll_timeout: Duration) -> Self {
        Self {
            http,
            endpoint,
            poll_timeout,
        }
    }

    async fn fetch(&self, url: url::Url) -> Result<SubscribeResponse, Error> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(protocol::server_error(status.as_u16(), &body));
        }
        protocol::decode_subscribe(&body)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn poll(&self, request: &PollRequest) -> Result<PollOutcome, Error> {
        let url = self
            .endpoint
            .subscribe_url(&request.channels, &request.groups, request.cursor)?;
        tracing::debug!(
            tt = %request.cursor.timetoken,
            channels = request.channels.len(),
            groups = request.groups.len(),
            "long-poll"
        );
        // Dropping the request future on timeout closes its connection.
        match tokio::time::timeout(self.poll_timeout, self.fetch(url)).await {
            Ok(result) => result.map(PollOutcome::Batch),
            Err(_) => Ok(PollOutcome::Timeout),
        }
    }
}
