//! Public entry points: [`Client`] and [`SessionHandle`].

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, TimingConfig};
use crate::outputs::Outputs;
use crate::protocol::Endpoint;
use crate::reconnect::ConnectionState;
use crate::session::{self, SessionStatus};
use crate::subscription_set::SubscriptionSet;
use crate::transport::{HttpTransport, Transport};
use crate::types::{Cursor, Error, Target, Timetoken};

/// A configured client. Cheap to clone; clones share the HTTP connection pool.
#[derive(Clone)]
pub struct Client {
    pub(crate) http: reqwest::Client,
    pub(crate) endpoint: Arc<Endpoint>,
    pub(crate) timing: TimingConfig,
    pub(crate) dispatch: Option<tracing::Dispatch>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("uuid", &self.endpoint.uuid())
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        config.validate()?;
        if config.cipher_key.is_some() {
            tracing::warn!("cipher key is set but decryption is not supported; payloads are delivered as received");
        }

        let uuid = config
            .uuid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let endpoint = Endpoint::new(&config, uuid)?;
        let http = reqwest::Client::builder()
            .connect_timeout(config.timing.connect_timeout)
            .build()?;

        tracing::info!(
            origin = %config.origin,
            uuid = endpoint.uuid(),
            ssl = config.ssl,
            signed = config.secret_key.is_some(),
            "client created"
        );

        Ok(Self {
            http,
            endpoint: Arc::new(endpoint),
            timing: config.timing,
            dispatch: None,
        })
    }

    /// Route this client's logs to `dispatch` instead of the dispatcher that
    /// is current when a session starts.
    pub fn with_dispatch(mut self, dispatch: tracing::Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Identity this client subscribes as.
    pub fn uuid(&self) -> &str {
        self.endpoint.uuid()
    }

    /// Start a subscription session for `targets`.
    ///
    /// Returns immediately. Events arrive on the conduits behind `outputs`;
    /// the session runs until [`SessionHandle::stop`], until the handle is
    /// dropped, or until it fails permanently.
    pub fn subscribe(
        &self,
        targets: impl IntoIterator<Item = Target>,
        outputs: Outputs,
    ) -> Result<SessionHandle, Error> {
        let transport = Arc::new(HttpTransport::new(
            self.http.clone(),
            Arc::clone(&self.endpoint),
            self.timing.poll_timeout,
        ));
        SessionHandle::spawn(
            transport,
            targets,
            outputs,
            &self.timing,
            self.dispatch.clone(),
        )
    }
}

/// Control handle of a running session. Dropping it stops the session.
#[derive(Debug)]
pub struct SessionHandle {
    set: SubscriptionSet,
    shutdown: CancellationToken,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Start a session over a custom [`Transport`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        targets: impl IntoIterator<Item = Target>,
        outputs: Outputs,
        timing: &TimingConfig,
        dispatch: Option<tracing::Dispatch>,
    ) -> Result<Self, Error> {
        let targets = validated(targets)?;
        let set = SubscriptionSet::new(targets);
        let shutdown = CancellationToken::new();
        let status = session::start(transport, &set, outputs, timing, shutdown.clone(), dispatch)?;
        Ok(Self {
            set,
            shutdown,
            status,
        })
    }

    /// Add targets. The poll in flight is restarted with the new set.
    ///
    /// Returns how many targets were not already subscribed. Nothing is added
    /// if any target is invalid.
    pub fn add(&self, targets: impl IntoIterator<Item = Target>) -> Result<usize, Error> {
        Ok(self.set.add(validated(targets)?))
    }

    /// Remove targets. Events already received for them are still delivered.
    pub fn remove<'a>(&self, targets: impl IntoIterator<Item = &'a Target>) -> usize {
        self.set.remove(targets)
    }

    pub fn targets(&self) -> Vec<Target> {
        self.set.snapshot().to_vec()
    }

    /// Drop the cursor and resubscribe from the current server position.
    /// Messages published since the last batch are skipped.
    pub fn reset_timetoken(&self) {
        self.set.request_reset();
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn cursor(&self) -> Cursor {
        self.status.borrow().cursor
    }

    pub fn timetoken(&self) -> Timetoken {
        self.cursor().timetoken
    }

    /// Stop the session. No further events are emitted.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == ConnectionState::Stopped
    }

    /// Wait until the session has stopped, on its own or by request.
    pub async fn wait_stopped(&self) {
        let mut status = self.status.clone();
        // A closed channel means the worker is gone, which also means stopped.
        let _ = status
            .wait_for(|s| s.state == ConnectionState::Stopped)
            .await;
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn validated(targets: impl IntoIterator<Item = Target>) -> Result<Vec<Target>, Error> {
    let targets: Vec<Target> = targets.into_iter().collect();
    for t in &targets {
        t.validate()?;
    }
    Ok(targets)
}
