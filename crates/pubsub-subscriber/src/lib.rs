//! Multiplexed long-poll pub/sub subscriber.
//!
//! Keeps a live subscription to any number of channels, channel groups and
//! wildcard patterns over HTTP long-polling, and delivers what arrives on
//! independent conduits for data, errors, connection lifecycle and poll
//! timeouts.
//!
//! # Features
//! - One poll in flight per session; changing the subscription restarts it
//! - Ordered delivery, cursor advanced only after a whole batch is handed over
//! - Presence events decoded from `-pnpres` channels
//! - Exponential backoff with jitter and a retry ceiling
//! - Bounded conduits with blocking producers (no silent drops)
//! - Optional HMAC-SHA256 request signing
//! - Channel-group administration
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), pubsub_subscriber::Error> {
//! use pubsub_subscriber::{Client, ClientConfig, ConnectionAction, Target, outputs};
//!
//! let client = Client::new(ClientConfig::new("sub-c-demo"))?;
//! let (out, mut rx) = outputs::channel(64);
//! let lobby = Target::channel("lobby");
//! let mut targets = vec![Target::group("friends")];
//! targets.extend(lobby.with_presence());
//! targets.push(lobby);
//! let session = client.subscribe(targets, out)?;
//!
//! loop {
//!     tokio::select! {
//!         Some(event) = rx.data.recv() => println!("{}: {}", event.channel, event.payload),
//!         Some(err) = rx.errors.recv() => eprintln!("{err}"),
//!         Some(conn) = rx.connection.recv() => {
//!             if conn.action == ConnectionAction::Connect {
//!                 println!("connected to {} targets", conn.targets.len());
//!             }
//!         }
//!         else => break,
//!     }
//! }
//! session.stop();
//! # Ok(())
//! # }
//! ```

mod admin;
mod config;
mod demux;
pub mod outputs;
pub mod protocol;
mod reconnect;
mod session;
mod subscribe;
mod subscription_set;
mod timetoken;
mod transport;
mod types;

pub use admin::{AdminReply, GroupAck};
pub use config::{ClientConfig, TimingConfig};
pub use demux::demultiplex;
pub use outputs::{Listener, Outputs};
pub use reconnect::{ConnectionState, ReconnectController, Recovery, RetryPolicy, StopReason};
pub use session::SessionStatus;
pub use subscribe::{Client, SessionHandle};
pub use subscription_set::{SetSnapshot, SubscriptionSet};
pub use timetoken::TimetokenStore;
pub use transport::{PollOutcome, PollRequest, Transport};
pub use types::{
    ConnectionAction, ConnectionEvent, Cursor, Error, ErrorEvent, Event, PRESENCE_SUFFIX,
    PollTimeout, Presence, PresenceAction, Target, TargetKind, Timetoken, WILDCARD_SUFFIX,
};
