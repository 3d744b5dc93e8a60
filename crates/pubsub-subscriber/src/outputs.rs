//! Consumer-facing conduits.
//!
//! Data, error and connection events travel on bounded queues whose producers
//! wait for room: a slow consumer slows the session down instead of losing
//! messages. Poll timeouts are idempotent signals and are dropped when their
//! queue is full.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::{ConnectionEvent, ErrorEvent, Event, PollTimeout};

/// Sender half of the conduits. Clone it to multiplex several sessions onto
/// the same consumer.
#[derive(Debug, Clone)]
pub struct Outputs {
    data: mpsc::Sender<Event>,
    errors: mpsc::Sender<ErrorEvent>,
    connection: mpsc::Sender<ConnectionEvent>,
    timeouts: mpsc::Sender<PollTimeout>,
}

/// Receiver half of the conduits. Each queue is independent; select over the
/// ones you care about.
#[derive(Debug)]
pub struct Listener {
    pub data: mpsc::Receiver<Event>,
    pub errors: mpsc::Receiver<ErrorEvent>,
    pub connection: mpsc::Receiver<ConnectionEvent>,
    pub timeouts: mpsc::Receiver<PollTimeout>,
}

/// Create a set of conduits, each holding up to `capacity` undelivered items.
pub fn channel(capacity: usize) -> (Outputs, Listener) {
    let capacity = capacity.max(1);
    let (data, data_rx) = mpsc::channel(capacity);
    let (errors, errors_rx) = mpsc::channel(capacity);
    let (connection, connection_rx) = mpsc::channel(capacity);
    let (timeouts, timeouts_rx) = mpsc::channel(capacity);
    (
        Outputs {
            data,
            errors,
            connection,
            timeouts,
        },
        Listener {
            data: data_rx,
            errors: errors_rx,
            connection: connection_rx,
            timeouts: timeouts_rx,
        },
    )
}

/// Result of handing an item to a conduit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// The receiver is gone.
    Closed,
    /// The session was stopped while waiting for room.
    Cancelled,
}

impl Outputs {
    pub(crate) async fn data(&self, event: Event, shutdown: &CancellationToken) -> Delivery {
        send(&self.data, event, shutdown).await
    }

    pub(crate) async fn error(&self, event: ErrorEvent, shutdown: &CancellationToken) -> Delivery {
        send(&self.errors, event, shutdown).await
    }

    pub(crate) async fn connection(
        &self,
        event: ConnectionEvent,
        shutdown: &CancellationToken,
    ) -> Delivery {
        send(&self.connection, event, shutdown).await
    }

    pub(crate) fn timeout(&self, signal: PollTimeout) {
        match self.timeouts.try_send(signal) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!("timeout conduit full, dropping signal");
            }
        }
    }
}

async fn send<T>(tx: &mpsc::Sender<T>, item: T, shutdown: &CancellationToken) -> Delivery {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Delivery::Cancelled,
        result = tx.send(item) => match result {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::Closed,
        },
    }
}
