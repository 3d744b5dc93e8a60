//! Batch demultiplexing: raw envelopes → per-target [`Event`]s.

use tokio_util::sync::CancellationToken;

use crate::outputs::{Delivery, Outputs};
use crate::protocol::{self, Envelope, SubscribeResponse};
use crate::timetoken::TimetokenStore;
use crate::types::{
    Error, Event, PRESENCE_SUFFIX, Presence, Target, TargetKind, WILDCARD_SUFFIX,
};

/// Decode every envelope of a batch, in order.
///
/// A malformed envelope becomes an `Err` at its position; the rest of the
/// batch is still decoded.
pub fn demultiplex(messages: Vec<serde_json::Value>) -> Vec<Result<Event, Error>> {
    messages.into_iter().map(decode_event).collect()
}

fn decode_event(raw: serde_json::Value) -> Result<Event, Error> {
    let Envelope {
        channel,
        subscription_match,
        payload,
        publisher,
        published,
    } = protocol::decode_envelope(raw)?;

    let subscription = origin_target(&channel, subscription_match.as_deref());
    let presence = if channel.ends_with(PRESENCE_SUFFIX) {
        let p = protocol::decode_presence(&payload)?;
        Some(Presence {
            action: p.action,
            uuid: p.uuid,
            occupancy: p.occupancy,
            timestamp: p.timestamp,
            state: p.data,
        })
    } else {
        None
    };

    Ok(Event {
        channel,
        subscription,
        timetoken: published.timetoken,
        payload,
        publisher,
        presence,
    })
}

/// Which subscription produced a message on `channel`.
///
/// The server sets the match field to the group or wildcard pattern that
/// caused delivery; when absent (or equal to the channel) it was a direct
/// channel subscription.
fn origin_target(channel: &str, matched: Option<&str>) -> Target {
    match matched {
        Some(m) if m != channel => {
            let pattern = m.strip_suffix(PRESENCE_SUFFIX).unwrap_or(m);
            if pattern.ends_with(WILDCARD_SUFFIX) {
                Target::wildcard(m)
            } else {
                Target::group(m)
            }
        }
        _ => Target::channel(channel),
    }
}

/// Decode `batch`, hand every event and decode error to the consumer, then
/// advance `store` to the batch cursor.
///
/// The cursor only moves once the whole batch has been handed over, so a
/// batch interrupted by a stop is fetched again by the next session that
/// starts from the same cursor.
pub(crate) async fn deliver(
    batch: SubscribeResponse,
    outputs: &Outputs,
    shutdown: &CancellationToken,
    store: &mut TimetokenStore,
) -> Delivery {
    let SubscribeResponse { cursor, messages } = batch;
    let total = messages.len();
    let mut malformed = 0usize;

    for item in demultiplex(messages) {
        match item {
            Ok(event) => {
                match event.subscription.kind() {
                    TargetKind::Channel => {
                        tracing::trace!(channel = %event.channel, tt = %event.timetoken, presence = event.is_presence(), "event");
                    }
                    TargetKind::ChannelGroup | TargetKind::Wildcard => {
                        tracing::trace!(
                            channel = %event.channel,
                            via = %event.subscription,
                            tt = %event.timetoken,
                            presence = event.is_presence(),
                            "event"
                        );
                    }
                }
                match outputs.data(event, shutdown).await {
                    Delivery::Delivered => {}
                    other => return other,
                }
            }
            Err(e) => {
                malformed += 1;
                tracing::warn!(error = %e, "skipping malformed envelope");
                if outputs.error(e.to_event(), shutdown).await == Delivery::Cancelled {
                    return Delivery::Cancelled;
                }
            }
        }
    }

    if total > 0 {
        tracing::debug!(total, malformed, next_tt = %cursor.timetoken, "batch delivered");
    }
    store.advance(cursor);
    Delivery::Delivered
}
