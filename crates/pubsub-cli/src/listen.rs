//! The subscribe loop: print what the session delivers until Ctrl-C.

use std::process::ExitCode;

use pubsub_subscriber::{
    Client, ConnectionEvent, Event, Presence, TargetKind, Timetoken, outputs,
};
use serde::Serialize;

use crate::config::Settings;
use crate::error::{CliError, CliResult};

const CONDUIT_CAPACITY: usize = 64;

/// One data event as printed on stdout.
#[derive(Debug, Serialize)]
struct DataLine<'a> {
    channel: &'a str,
    timetoken: Timetoken,
    #[serde(skip_serializing_if = "Option::is_none")]
    group: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wildcard: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    publisher: Option<&'a str>,
    payload: &'a serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence: Option<&'a Presence>,
}

impl<'a> From<&'a Event> for DataLine<'a> {
    fn from(event: &'a Event) -> Self {
        let name = event.subscription.name();
        let (group, wildcard) = match event.subscription.kind() {
            TargetKind::Channel => (None, None),
            TargetKind::ChannelGroup => (Some(name), None),
            TargetKind::Wildcard => (None, Some(name)),
        };
        Self {
            channel: &event.channel,
            timetoken: event.timetoken,
            group,
            wildcard,
            publisher: event.publisher.as_deref(),
            payload: &event.payload,
            presence: event.presence.as_ref(),
        }
    }
}

fn render_connection(event: &ConnectionEvent) -> String {
    let targets: Vec<String> = event.targets.iter().map(ToString::to_string).collect();
    format!("{}: {}", event.action, targets.join(", "))
}

/// Returns success when stopped by Ctrl-C and failure when the session gave up.
pub async fn run(settings: Settings) -> CliResult<ExitCode> {
    let client = Client::new(settings.client)?;

    if let Some(assignment) = settings.add_to_group {
        let ack = client
            .spawn_add_channels_to_group(assignment.group, assignment.channels)?
            .recv()
            .await
            .map_err(CliError::Admin)?;
        tracing::info!(group = %ack.group, channels = ?ack.channels, "registered channels in group");
    }

    let (out, mut rx) = outputs::channel(CONDUIT_CAPACITY);
    let session = client.subscribe(settings.targets, out)?;
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    // Conduits come first so everything a stopping session queued is printed
    // before its stop is noticed.
    let code = loop {
        tokio::select! {
            biased;
            Some(event) = rx.data.recv() => {
                println!("{}", serde_json::to_string(&DataLine::from(&event))?);
            }
            Some(err) = rx.errors.recv() => eprintln!("error: {err}"),
            Some(conn) = rx.connection.recv() => eprintln!("{}", render_connection(&conn)),
            Some(timeout) = rx.timeouts.recv() => {
                tracing::info!(tt = %timeout.timetoken, "no activity within {:?}", timeout.after);
            }
            result = &mut interrupted => {
                if let Err(e) = result {
                    tracing::warn!("failed to listen for Ctrl-C: {e}");
                }
                tracing::info!("interrupted, stopping");
                break ExitCode::SUCCESS;
            }
            () = session.wait_stopped() => break ExitCode::FAILURE,
        }
    };

    session.stop();
    session.wait_stopped().await;
    tracing::info!(tt = %session.timetoken(), "session stopped");
    Ok(code)
}
