//! Channel-group administration.
//!
//! These calls are independent of any subscription session: they use their
//! own request timeout and report failures only to their caller.

use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::instrument::WithSubscriber as _;

use crate::protocol::{self, GroupOp, ServiceResponse};
use crate::subscribe::Client;
use crate::types::{Error, ErrorEvent, Target};

/// Outcome of a successful channel-group call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAck {
    pub group: String,
    /// Channels added or removed, or the group's members for a listing.
    pub channels: Vec<String>,
    /// Server status message, e.g. `"OK"`.
    pub message: String,
}

/// One-shot conduit for a spawned channel-group call.
#[derive(Debug)]
pub struct AdminReply {
    rx: oneshot::Receiver<Result<GroupAck, ErrorEvent>>,
}

impl AdminReply {
    /// Wait for the call to finish.
    pub async fn recv(self) -> Result<GroupAck, ErrorEvent> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(ErrorEvent::client("channel-group request abandoned")))
    }
}

#[derive(Deserialize)]
struct GroupListing {
    #[serde(default)]
    channels: Vec<String>,
}

impl Client {
    /// Register `channels` in `group`, creating the group if needed.
    pub async fn add_channels_to_group(
        &self,
        group: &str,
        channels: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<GroupAck, Error> {
        let channels = group_members(channels)?;
        self.group_request(group, GroupOp::Add(channels)).await
    }

    pub async fn remove_channels_from_group(
        &self,
        group: &str,
        channels: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<GroupAck, Error> {
        let channels = group_members(channels)?;
        self.group_request(group, GroupOp::Remove(channels)).await
    }

    pub async fn list_channels_in_group(&self, group: &str) -> Result<GroupAck, Error> {
        self.group_request(group, GroupOp::List).await
    }

    pub async fn delete_channel_group(&self, group: &str) -> Result<GroupAck, Error> {
        self.group_request(group, GroupOp::Delete).await
    }

    /// Run [`add_channels_to_group`](Self::add_channels_to_group) in the
    /// background and deliver the outcome on the returned [`AdminReply`].
    pub fn spawn_add_channels_to_group(
        &self,
        group: impl Into<String>,
        channels: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<AdminReply, Error> {
        let runtime = tokio::runtime::Handle::try_current()?;
        let group = group.into();
        let channels: Vec<String> = channels.into_iter().map(Into::into).collect();
        let (tx, rx) = oneshot::channel();

        let client = self.clone();
        let task = async move {
            let result = client
                .add_channels_to_group(&group, channels)
                .await
                .map_err(|e| e.to_event());
            // The caller may have dropped the reply; nothing to do then.
            let _ = tx.send(result);
        };
        match self.dispatch.clone() {
            Some(dispatch) => runtime.spawn(task.with_subscriber(dispatch)),
            None => runtime.spawn(task.with_current_subscriber()),
        };
        Ok(AdminReply { rx })
    }

    async fn group_request(&self, group: &str, op: GroupOp) -> Result<GroupAck, Error> {
        Target::group(group).validate()?;
        let url = self.endpoint.channel_group_url(group, &op)?;
        tracing::debug!(group, ?op, "channel-group request");

        let resp = self
            .http
            .get(url)
            .timeout(self.timing.request_timeout)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            let err = protocol::server_error(status.as_u16(), &body);
            tracing::warn!(group, "channel-group request failed: {err}");
            return Err(err);
        }

        let reply: ServiceResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::Decode(format!("channel-group response: {e}")))?;
        let message = reply.message.unwrap_or_else(|| "OK".to_string());
        if reply.error {
            return Err(Error::Server {
                status: reply.status.unwrap_or(status.as_u16()),
                message,
                payload: reply.payload,
            });
        }

        let channels = match op {
            GroupOp::Add(channels) | GroupOp::Remove(channels) => channels,
            GroupOp::List => {
                let payload = reply.payload.ok_or_else(|| {
                    Error::Decode("channel-group listing without payload".to_string())
                })?;
                GroupListing::deserialize(&payload)
                    .map_err(|e| Error::Decode(format!("channel-group listing: {e}")))?
                    .channels
            }
            GroupOp::Delete => Vec::new(),
        };
        tracing::info!(group, channels = channels.len(), "channel-group request done");
        Ok(GroupAck {
            group: group.to_string(),
            channels,
            message,
        })
    }
}

fn group_members(channels: impl IntoIterator<Item = impl Into<String>>) -> Result<Vec<String>, Error> {
    let channels: Vec<String> = channels.into_iter().map(Into::into).collect();
    if channels.is_empty() {
        return Err(Error::InvalidTarget("no channels given".to_string()));
    }
    for c in &channels {
        Target::channel(c.as_str()).validate()?;
    }
    Ok(channels)
}
