//! Session worker: the poll loop that ties the transport, the demultiplexer
//! and the reconnection controller together.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;
use tracing::instrument::WithSubscriber as _;

use crate::config::TimingConfig;
use crate::demux;
use crate::outputs::{Delivery, Outputs};
use crate::protocol::SubscribeResponse;
use crate::reconnect::{ConnectionState, ReconnectController, Recovery, RetryPolicy, StopReason};
use crate::subscription_set::{SetSnapshot, SubscriptionSet};
use crate::timetoken::TimetokenStore;
use crate::transport::{PollOutcome, PollRequest, Transport};
use crate::types::{
    ConnectionAction, ConnectionEvent, Cursor, Error, ErrorEvent, PollTimeout, Target,
};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Observable state of a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub cursor: Cursor,
}

enum LoopAction {
    Continue,
    Stop,
}

struct Worker {
    transport: Arc<dyn Transport>,
    set_rx: watch::Receiver<SetSnapshot>,
    store: TimetokenStore,
    controller: ReconnectController,
    outputs: Outputs,
    shutdown: CancellationToken,
    status_tx: watch::Sender<SessionStatus>,
    /// Targets a Connect/Reconnect has been emitted for since the last
    /// (re)connect.
    announced: BTreeSet<Target>,
    reset_generation: u64,
    poll_timeout: Duration,
}

/// Spawn a session worker on the current tokio runtime.
///
/// The worker runs under `dispatch` when given, otherwise under the
/// dispatcher that is current at the call site, inside a `session` span.
pub(crate) fn start(
    transport: Arc<dyn Transport>,
    set: &SubscriptionSet,
    outputs: Outputs,
    timing: &TimingConfig,
    shutdown: CancellationToken,
    dispatch: Option<tracing::Dispatch>,
) -> Result<watch::Receiver<SessionStatus>, Error> {
    let runtime = tokio::runtime::Handle::try_current()?;
    let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);

    let set_rx = set.watch();
    let reset_generation = set_rx.borrow().reset_generation();
    let (status_tx, status_rx) = watch::channel(SessionStatus {
        state: ConnectionState::Disconnected,
        cursor: Cursor::default(),
    });

    let worker = Worker {
        transport,
        set_rx,
        store: TimetokenStore::new(),
        controller: ReconnectController::new(RetryPolicy::from(timing)),
        outputs,
        shutdown,
        status_tx,
        announced: BTreeSet::new(),
        reset_generation,
        poll_timeout: timing.poll_timeout,
    };

    let dispatch =
        dispatch.unwrap_or_else(|| tracing::dispatcher::get_default(tracing::Dispatch::clone));
    let span =
        tracing::dispatcher::with_default(&dispatch, || tracing::info_span!("session", id));
    runtime.spawn(worker.run().instrument(span).with_subscriber(dispatch));
    Ok(status_rx)
}

impl Worker {
    async fn run(mut self) {
        tracing::info!(targets = self.set_rx.borrow().len(), "session started");

        loop {
            let snapshot = self.set_rx.borrow_and_update().clone();
            if snapshot.reset_generation() != self.reset_generation {
                self.reset_generation = snapshot.reset_generation();
                self.store.reset();
                self.publish_status();
            }

            if snapshot.is_empty() {
                tracing::debug!("no targets, waiting for a subscription");
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    changed = self.set_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }

            self.announced.retain(|t| snapshot.contains(t));
            let request = PollRequest::new(&snapshot, self.store.cursor());
            let transport = Arc::clone(&self.transport);

            // Only the request is cancelled here; a batch that already
            // returned is always fully delivered below.
            let outcome = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                changed = self.set_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    tracing::debug!("subscription changed, restarting poll");
                    continue;
                }
                outcome = transport.poll(&request) => outcome,
            };

            let action = match outcome {
                Ok(PollOutcome::Batch(batch)) => self.on_batch(&snapshot, batch).await,
                Ok(PollOutcome::Timeout) => self.on_timeout(request.cursor),
                Err(e) => self.on_error(&snapshot, e).await,
            };
            if let LoopAction::Stop = action {
                break;
            }
        }

        self.controller.stop();
        tracing::info!(tt = %self.store.timetoken(), "session stopped");
        self.publish_status();
    }

    async fn on_batch(&mut self, snapshot: &SetSnapshot, batch: SubscribeResponse) -> LoopAction {
        let notice = match self.controller.on_success() {
            Some(action) => {
                tracing::info!(%action, targets = snapshot.len(), tt = %batch.cursor.timetoken, "subscribed");
                self.announced = snapshot.targets().cloned().collect();
                Some(ConnectionEvent {
                    action,
                    targets: snapshot.to_vec(),
                })
            }
            None => {
                let fresh: Vec<Target> = snapshot
                    .targets()
                    .filter(|t| !self.announced.contains(*t))
                    .cloned()
                    .collect();
                if fresh.is_empty() {
                    None
                } else {
                    tracing::info!(added = fresh.len(), "subscribed to additional targets");
                    self.announced.extend(fresh.iter().cloned());
                    Some(ConnectionEvent {
                        action: ConnectionAction::Connect,
                        targets: fresh,
                    })
                }
            }
        };
        self.publish_status();

        if let Some(event) = notice
            && let LoopAction::Stop = self.emit_connection(event).await
        {
            return LoopAction::Stop;
        }

        match demux::deliver(batch, &self.outputs, &self.shutdown, &mut self.store).await {
            Delivery::Delivered => {
                self.publish_status();
                LoopAction::Continue
            }
            Delivery::Closed => {
                tracing::warn!("data receiver dropped, stopping session");
                LoopAction::Stop
            }
            Delivery::Cancelled => LoopAction::Stop,
        }
    }

    fn on_timeout(&self, polled_at: Cursor) -> LoopAction {
        tracing::debug!(tt = %polled_at.timetoken, "poll timed out, polling again");
        self.outputs.timeout(PollTimeout {
            timetoken: polled_at.timetoken,
            after: self.poll_timeout,
        });
        LoopAction::Continue
    }

    async fn on_error(&mut self, snapshot: &SetSnapshot, err: Error) -> LoopAction {
        let recovery = self.controller.on_error(err.is_permanent());
        self.publish_status();

        if let LoopAction::Stop = self.emit_error(err.to_event()).await {
            return LoopAction::Stop;
        }

        match recovery {
            Recovery::Retry {
                attempt,
                delay,
                announce_disconnect,
            } => {
                tracing::warn!(attempt, ?delay, "poll failed: {err}");
                if announce_disconnect
                    && let LoopAction::Stop = self.emit_disconnect(snapshot).await
                {
                    return LoopAction::Stop;
                }
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => {
                        tracing::info!("stop requested during backoff");
                        LoopAction::Stop
                    }
                    _ = tokio::time::sleep(delay) => LoopAction::Continue,
                }
            }
            Recovery::Stop(reason) => {
                match reason {
                    StopReason::Permanent => {
                        tracing::error!("poll rejected permanently: {err}");
                    }
                    StopReason::RetriesExhausted { attempts } => {
                        tracing::error!(attempts, "giving up after repeated poll failures: {err}");
                    }
                    StopReason::Requested => return LoopAction::Stop,
                }
                if let LoopAction::Stop = self.emit_disconnect(snapshot).await {
                    return LoopAction::Stop;
                }
                if let StopReason::RetriesExhausted { attempts } = reason {
                    self.emit_error(ErrorEvent::client(format!(
                        "subscribe failed after {attempts} attempts"
                    )))
                    .await;
                }
                LoopAction::Stop
            }
        }
    }

    async fn emit_disconnect(&self, snapshot: &SetSnapshot) -> LoopAction {
        self.emit_connection(ConnectionEvent {
            action: ConnectionAction::Disconnect,
            targets: snapshot.to_vec(),
        })
        .await
    }

    /// A closed connection or error receiver is not fatal: the consumer may
    /// only care about data.
    async fn emit_connection(&self, event: ConnectionEvent) -> LoopAction {
        match self.outputs.connection(event, &self.shutdown).await {
            Delivery::Cancelled => LoopAction::Stop,
            Delivery::Delivered | Delivery::Closed => LoopAction::Continue,
        }
    }

    async fn emit_error(&self, event: ErrorEvent) -> LoopAction {
        match self.outputs.error(event, &self.shutdown).await {
            Delivery::Cancelled => LoopAction::Stop,
            Delivery::Delivered | Delivery::Closed => LoopAction::Continue,
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(SessionStatus {
            state: self.controller.state(),
            cursor: self.store.cursor(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::outputs::{self, Listener};
    use crate::types::Timetoken;

    enum Step {
        Batch(u64, Vec<serde_json::Value>),
        Timeout,
        Fail(u16),
        Hang,
    }

    /// Plays back a fixed list of poll outcomes, then hangs.
    struct Scripted {
        steps: Mutex<VecDeque<Step>>,
        requests: mpsc::UnboundedSender<PollRequest>,
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn poll(&self, request: &PollRequest) -> Result<PollOutcome, Error> {
            let _ = self.requests.send(request.clone());
            let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Hang);
            match step {
                Step::Batch(next, messages) => Ok(PollOutcome::Batch(SubscribeResponse {
                    cursor: Cursor::new(next, Some(1)),
                    messages,
                })),
                Step::Timeout => Ok(PollOutcome::Timeout),
                Step::Fail(status) => Err(Error::Server {
                    status,
                    message: format!("status {status}"),
                    payload: None,
                }),
                Step::Hang => std::future::pending().await,
            }
        }
    }

    struct Harness {
        set: SubscriptionSet,
        shutdown: CancellationToken,
        status: watch::Receiver<SessionStatus>,
        rx: Listener,
        requests: mpsc::UnboundedReceiver<PollRequest>,
    }

    impl Harness {
        async fn stopped(&mut self) -> SessionStatus {
            *self
                .status
                .wait_for(|s| s.state == ConnectionState::Stopped)
                .await
                .unwrap()
        }
    }

    fn timing(max_retry_attempts: u32) -> TimingConfig {
        TimingConfig {
            poll_timeout: Duration::from_secs(5),
            max_retry_attempts,
            retry_jitter: Duration::ZERO,
            ..TimingConfig::default()
        }
    }

    fn harness(targets: Vec<Target>, steps: Vec<Step>, timing: TimingConfig) -> Harness {
        harness_with_capacity(targets, steps, timing, 16)
    }

    fn harness_with_capacity(
        targets: Vec<Target>,
        steps: Vec<Step>,
        timing: TimingConfig,
        capacity: usize,
    ) -> Harness {
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let transport = Arc::new(Scripted {
            steps: Mutex::new(steps.into()),
            requests: requests_tx,
        });
        let set = SubscriptionSet::new(targets);
        let (out, rx) = outputs::channel(capacity);
        let shutdown = CancellationToken::new();
        let status = start(transport, &set, out, &timing, shutdown.clone(), None).unwrap();
        Harness {
            set,
            shutdown,
            status,
            rx,
            requests,
        }
    }

    fn msg(channel: &str, tt: u64, payload: serde_json::Value) -> serde_json::Value {
        json!({"c": channel, "d": payload, "p": {"t": tt.to_string()}})
    }

    async fn nothing_more<T: std::fmt::Debug>(rx: &mut mpsc::Receiver<T>) {
        let next = tokio::time::timeout(Duration::from_secs(60), rx.recv()).await;
        assert!(
            matches!(next, Err(_) | Ok(None)),
            "unexpected item: {next:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn first_batch_connects_and_delivers() {
        let mut h = harness(
            vec![Target::channel("A")],
            vec![Step::Batch(1001, vec![msg("A", 1000, json!("hi"))])],
            timing(3),
        );

        let ev = h.rx.connection.recv().await.unwrap();
        assert_eq!(ev.action, ConnectionAction::Connect);
        assert_eq!(ev.targets, vec![Target::channel("A")]);

        let data = h.rx.data.recv().await.unwrap();
        assert_eq!(data.payload, json!("hi"));
        assert_eq!(data.timetoken, Timetoken(1000));

        // Second request carries the advanced cursor
        assert!(h.requests.recv().await.unwrap().cursor.timetoken.is_zero());
        assert_eq!(
            h.requests.recv().await.unwrap().cursor.timetoken,
            Timetoken(1001)
        );
        assert_eq!(h.status.borrow().state, ConnectionState::Connected);
        assert_eq!(h.status.borrow().cursor.timetoken, Timetoken(1001));
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_emit_no_connection_events() {
        let mut h = harness(
            vec![Target::channel("A")],
            vec![
                Step::Batch(100, vec![]),
                Step::Timeout,
                Step::Timeout,
                Step::Timeout,
            ],
            timing(3),
        );

        assert_eq!(
            h.rx.connection.recv().await.unwrap().action,
            ConnectionAction::Connect
        );
        for _ in 0..3 {
            let signal = h.rx.timeouts.recv().await.unwrap();
            assert_eq!(signal.timetoken, Timetoken(100));
            assert_eq!(signal.after, Duration::from_secs(5));
        }
        nothing_more(&mut h.rx.connection).await;

        // Handshake, three timed-out polls, and the one still in flight
        for _ in 0..5 {
            assert!(h.requests.recv().await.is_some());
        }
        assert_eq!(h.status.borrow().state, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_stops_without_retry() {
        let mut h = harness(vec![Target::channel("A")], vec![Step::Fail(403)], timing(3));

        let status = h.stopped().await;
        assert_eq!(status.state, ConnectionState::Stopped);

        let err = h.rx.errors.recv().await.unwrap();
        assert!(matches!(err, ErrorEvent::ServerSide { status: 403, .. }));
        assert!(h.rx.errors.recv().await.is_none());

        let ev = h.rx.connection.recv().await.unwrap();
        assert_eq!(ev.action, ConnectionAction::Disconnect);
        assert!(h.rx.connection.recv().await.is_none());

        assert!(h.requests.recv().await.is_some());
        assert!(h.requests.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_disconnects_then_reconnects() {
        let mut h = harness(
            vec![Target::channel("A")],
            vec![
                Step::Batch(100, vec![]),
                Step::Fail(500),
                Step::Batch(200, vec![msg("A", 150, json!(1))]),
            ],
            timing(3),
        );

        let actions: Vec<ConnectionAction> = [
            h.rx.connection.recv().await.unwrap(),
            h.rx.connection.recv().await.unwrap(),
            h.rx.connection.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|e| e.action)
        .collect();
        assert_eq!(
            actions,
            vec![
                ConnectionAction::Connect,
                ConnectionAction::Disconnect,
                ConnectionAction::Reconnect
            ]
        );
        assert!(matches!(
            h.rx.errors.recv().await.unwrap(),
            ErrorEvent::ServerSide { status: 500, .. }
        ));
        assert_eq!(h.rx.data.recv().await.unwrap().payload, json!(1));

        // The retry reuses the cursor of the last good batch
        let cursors: Vec<u64> = [
            h.requests.recv().await.unwrap(),
            h.requests.recv().await.unwrap(),
            h.requests.recv().await.unwrap(),
        ]
        .iter()
        .map(|r| r.cursor.timetoken.0)
        .collect();
        assert_eq!(cursors, vec![0, 100, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_exhaustion_stops_session() {
        let mut h = harness(
            vec![Target::channel("A")],
            vec![
                Step::Batch(100, vec![]),
                Step::Fail(503),
                Step::Fail(503),
                Step::Fail(503),
            ],
            timing(2),
        );

        h.stopped().await;

        let mut errors = Vec::new();
        while let Some(e) = h.rx.errors.recv().await {
            errors.push(e);
        }
        assert_eq!(errors.len(), 4);
        assert_eq!(
            errors.last(),
            Some(&ErrorEvent::client("subscribe failed after 2 attempts"))
        );

        let mut actions = Vec::new();
        while let Some(e) = h.rx.connection.recv().await {
            actions.push(e.action);
        }
        assert_eq!(
            actions,
            vec![
                ConnectionAction::Connect,
                ConnectionAction::Disconnect,
                ConnectionAction::Disconnect
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn added_target_restarts_poll_and_is_announced() {
        let mut h = harness(
            vec![Target::channel("a")],
            vec![Step::Batch(100, vec![]), Step::Hang, Step::Batch(200, vec![])],
            timing(3),
        );

        let first = h.rx.connection.recv().await.unwrap();
        assert_eq!(first.targets, vec![Target::channel("a")]);
        h.requests.recv().await.unwrap();
        // In flight, hanging
        h.requests.recv().await.unwrap();

        h.set.add([Target::group("g")]);

        let restarted = h.requests.recv().await.unwrap();
        assert_eq!(restarted.channels, vec!["a"]);
        assert_eq!(restarted.groups, vec!["g"]);
        assert_eq!(restarted.cursor.timetoken, Timetoken(100));

        let late = h.rx.connection.recv().await.unwrap();
        assert_eq!(late.action, ConnectionAction::Connect);
        assert_eq!(late.targets, vec![Target::group("g")]);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_target_restarts_poll_without_it() {
        let mut h = harness(
            vec![Target::channel("a"), Target::channel("b")],
            vec![Step::Batch(100, vec![]), Step::Hang],
            timing(3),
        );

        assert_eq!(h.requests.recv().await.unwrap().channels, vec!["a", "b"]);
        // In flight, hanging
        h.requests.recv().await.unwrap();

        assert_eq!(h.set.remove(&[Target::channel("b")]), 1);

        let restarted = h.requests.recv().await.unwrap();
        assert_eq!(restarted.channels, vec!["a"]);
        assert!(restarted.groups.is_empty());
        assert_eq!(restarted.cursor.timetoken, Timetoken(100));
    }

    #[tokio::test(start_paused = true)]
    async fn set_change_during_delivery_keeps_whole_batch() {
        let mut h = harness_with_capacity(
            vec![Target::channel("a")],
            vec![Step::Batch(
                100,
                vec![
                    msg("a", 97, json!(1)),
                    msg("a", 98, json!(2)),
                    msg("a", 99, json!(3)),
                ],
            )],
            timing(3),
            1,
        );

        h.rx.connection.recv().await.unwrap();
        // Let the worker fill the data conduit and block on the second event
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(h.status.borrow().cursor.timetoken.is_zero());

        h.set.remove(&[Target::channel("a")]);
        h.set.add([Target::channel("z")]);

        let mut payloads = Vec::new();
        for _ in 0..3 {
            payloads.push(h.rx.data.recv().await.unwrap().payload);
        }
        assert_eq!(payloads, vec![json!(1), json!(2), json!(3)]);

        assert!(h.requests.recv().await.unwrap().cursor.timetoken.is_zero());
        let next = h.requests.recv().await.unwrap();
        assert_eq!(next.channels, vec!["z"]);
        assert_eq!(next.cursor.timetoken, Timetoken(100));
        assert_eq!(h.status.borrow().cursor.timetoken, Timetoken(100));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_set_waits_for_targets() {
        let mut h = harness(vec![], vec![Step::Batch(100, vec![])], timing(3));

        let idle = tokio::time::timeout(Duration::from_secs(60), h.requests.recv()).await;
        assert!(idle.is_err());

        h.set.add([Target::channel("late")]);
        let req = h.requests.recv().await.unwrap();
        assert_eq!(req.channels, vec!["late"]);
        assert_eq!(
            h.rx.connection.recv().await.unwrap().action,
            ConnectionAction::Connect
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_session() {
        let mut h = harness(vec![Target::channel("A")], vec![Step::Batch(100, vec![])], timing(3));

        h.rx.connection.recv().await.unwrap();
        h.shutdown.cancel();
        assert_eq!(h.stopped().await.cursor.timetoken, Timetoken(100));

        // Worker is gone and dropped its conduits
        assert!(h.rx.connection.recv().await.is_none());
        assert!(h.rx.data.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restarts_from_zero() {
        let mut h = harness(
            vec![Target::channel("A")],
            vec![Step::Batch(100, vec![]), Step::Batch(200, vec![])],
            timing(3),
        );

        h.requests.recv().await.unwrap();
        h.requests.recv().await.unwrap();
        let third = h.requests.recv().await.unwrap();
        assert_eq!(third.cursor.timetoken, Timetoken(200));

        h.set.request_reset();
        let after_reset = h.requests.recv().await.unwrap();
        assert!(after_reset.cursor.timetoken.is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn older_server_cursor_is_ignored() {
        let mut h = harness(
            vec![Target::channel("A")],
            vec![Step::Batch(100, vec![]), Step::Batch(50, vec![])],
            timing(3),
        );

        let cursors: Vec<u64> = [
            h.requests.recv().await.unwrap(),
            h.requests.recv().await.unwrap(),
            h.requests.recv().await.unwrap(),
        ]
        .iter()
        .map(|r| r.cursor.timetoken.0)
        .collect();
        assert_eq!(cursors, vec![0, 100, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_data_receiver_stops_session() {
        let h = harness(
            vec![Target::channel("A")],
            vec![Step::Batch(100, vec![msg("A", 99, json!("x"))])],
            timing(3),
        );
        let Harness { mut status, rx, .. } = h;
        drop(rx.data);

        let stopped = status
            .wait_for(|s| s.state == ConnectionState::Stopped)
            .await
            .unwrap();
        assert!(stopped.cursor.timetoken.is_zero());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn logs_go_to_injected_dispatch() {
        let captured = Captured::default();
        let writer = captured.clone();
        let dispatch = tracing::Dispatch::new(
            tracing_subscriber::fmt()
                .with_writer(move || writer.clone())
                .with_ansi(false)
                .with_max_level(tracing::Level::DEBUG)
                .finish(),
        );

        let (requests_tx, _requests) = mpsc::unbounded_channel();
        let transport = Arc::new(Scripted {
            steps: Mutex::new(VecDeque::from([Step::Batch(100, vec![])])),
            requests: requests_tx,
        });
        let set = SubscriptionSet::new([Target::channel("A")]);
        let (out, mut rx) = outputs::channel(4);
        let shutdown = CancellationToken::new();
        let mut status = start(
            transport,
            &set,
            out,
            &timing(3),
            shutdown.clone(),
            Some(dispatch),
        )
        .unwrap();

        rx.connection.recv().await.unwrap();
        shutdown.cancel();
        status
            .wait_for(|s| s.state == ConnectionState::Stopped)
            .await
            .unwrap();

        let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("session{id="), "{text}");
        assert!(text.contains("session started"), "{text}");
        assert!(text.contains("session stopped"), "{text}");
    }
}
