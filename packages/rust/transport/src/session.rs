//! Persistent realtime session.
//!
//! One driver task owns all session state (pending requests, segmentation
//! buffer, big-payload slot, attempt counter) and reacts to socket events and
//! handle commands one at a time. [`SessionHandle`] is the cloneable front:
//! it sends commands in and receives typed [`SessionEvent`]s out.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::Value;
use spacebook_shared::{Result, SpacebookError};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::backoff::ReconnectPolicy;
use crate::frame::{self, Envelope, Inbound, PushNotification, Response, STATUS_OK};
use crate::socket::{Connector, Socket, SocketEvent};

/// Interval between keepalive frames while connected.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

const KEEPALIVE_FRAME: &str = "0";

const EVENT_CAPACITY: usize = 64;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Connecting,
    Connected,
}

/// Out-of-band notifications fanned out to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The server confirmed the connection.
    Connected,
    /// First failure of a disconnect episode; reconnecting in the background.
    Reconnecting,
    Push(PushNotification),
    /// Reconnect budget exhausted; the session is closed for good.
    Fatal(String),
}

enum Command {
    Request {
        payload: Value,
        reply: oneshot::Sender<Result<Response>>,
    },
    Close,
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    fatal: Arc<OnceLock<String>>,
}

impl SessionHandle {
    /// Start connecting to `uri` with the default reconnect policy.
    pub fn open<C: Connector>(connector: C, uri: impl Into<String>) -> Self {
        Self::open_with_policy(connector, uri, ReconnectPolicy::default())
    }

    pub fn open_with_policy<C: Connector>(
        connector: C,
        uri: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SessionState::Connecting);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let fatal = Arc::new(OnceLock::new());

        let driver = Driver {
            connector: Arc::new(connector),
            uri: uri.into(),
            policy,
            attempts: 0,
            state: state_tx,
            events: events.clone(),
            fatal: Arc::clone(&fatal),
            commands: command_rx,
            pending: BTreeMap::new(),
            next_id: 1,
            segments: None,
            big_payload: None,
        };
        tokio::spawn(driver.run());

        Self {
            commands,
            state,
            events,
            fatal,
        }
    }

    /// Wait until the session is connected.
    pub async fn ready(&self) -> Result<()> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| *s != SessionState::Connecting)
            .await
            .map(|s| *s);
        match reached {
            Ok(SessionState::Connected) => Ok(()),
            _ => Err(self.closed_error()),
        }
    }

    /// Send `payload` and wait for its numbered response.
    ///
    /// There is no deadline: an unanswered request waits forever. Use
    /// [`SessionHandle::request_timeout`] for a bounded wait.
    pub async fn request(&self, payload: Value) -> Result<Response> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Request { payload, reply })
            .map_err(|_| self.closed_error())?;
        response.await.map_err(|_| self.closed_error())?
    }

    /// [`SessionHandle::request`] bounded by `limit`.
    pub async fn request_timeout(&self, payload: Value, limit: Duration) -> Result<Response> {
        tokio::time::timeout(limit, self.request(payload))
            .await
            .map_err(|_| SpacebookError::Timeout(limit))?
    }

    /// Query a logical path.
    pub async fn query(&self, path: &str) -> Result<Response> {
        self.request(frame::query(path)).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Close the session for good.
    ///
    /// A lost connection leaves requests already sent unanswered; closing
    /// instead rejects every pending request with
    /// [`SpacebookError::SessionClosed`], so no caller is left waiting.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    fn closed_error(&self) -> SpacebookError {
        match self.fatal.get() {
            Some(reason) => SpacebookError::transport(reason.clone()),
            None => SpacebookError::SessionClosed,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

struct PendingRequest {
    frame: String,
    reply: oneshot::Sender<Result<Response>>,
    sent: bool,
}

struct Segments {
    remaining: usize,
    buf: String,
}

enum Connecting {
    Open(Socket),
    Failed(String),
    Closed,
}

enum Exit {
    Closed,
    Lost(String),
}

struct Driver<C> {
    connector: Arc<C>,
    uri: String,
    policy: ReconnectPolicy,
    attempts: u32,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    fatal: Arc<OnceLock<String>>,
    commands: mpsc::UnboundedReceiver<Command>,
    pending: BTreeMap<u64, PendingRequest>,
    next_id: u64,
    segments: Option<Segments>,
    big_payload: Option<Envelope>,
}

impl<C: Connector> Driver<C> {
    #[instrument(skip_all, fields(uri = %self.uri))]
    async fn run(mut self) -> Result<()> {
        loop {
            let reason = match self.connect().await {
                Connecting::Open(socket) => match self.drive(socket).await {
                    Exit::Closed => return Ok(()),
                    Exit::Lost(reason) => reason,
                },
                Connecting::Failed(reason) => reason,
                Connecting::Closed => return Ok(()),
            };
            if !self.wait_before_retry(reason).await? {
                return Ok(());
            }
        }
    }

    async fn connect(&mut self) -> Connecting {
        self.set_state(SessionState::Connecting);
        let connector = Arc::clone(&self.connector);
        let uri = self.uri.clone();
        let connecting = async move { connector.connect(&uri).await };
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => {
                    return match result {
                        Ok(socket) => Connecting::Open(socket),
                        Err(e) => Connecting::Failed(e.to_string()),
                    };
                }
                cmd = self.commands.recv() => {
                    if !self.accept_offline(cmd) {
                        self.shutdown();
                        return Connecting::Closed;
                    }
                }
            }
        }
    }

    async fn drive(&mut self, mut socket: Socket) -> Exit {
        let mut keepalive =
            tokio::time::interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let connected = self.is_connected();
            tokio::select! {
                event = socket.recv() => match event {
                    Some(SocketEvent::Frame(text)) => {
                        if self.on_frame(&socket, text) {
                            keepalive.reset();
                        }
                    }
                    Some(SocketEvent::Closed(reason)) => {
                        socket.terminate();
                        return Exit::Lost(reason);
                    }
                    None => {
                        socket.terminate();
                        return Exit::Lost("connection dropped".into());
                    }
                },
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Request { payload, reply }) => {
                        if let Some(id) = self.register(payload, reply) {
                            if self.is_connected() {
                                self.transmit(&socket, id);
                            }
                        }
                    }
                    Some(Command::Close) | None => {
                        socket.terminate();
                        self.shutdown();
                        return Exit::Closed;
                    }
                },
                _ = keepalive.tick(), if connected => {
                    trace!("keepalive");
                    socket.send(KEEPALIVE_FRAME.into());
                }
            }
        }
    }

    /// Handle one raw frame. Returns `true` when it established the connection.
    fn on_frame(&mut self, socket: &Socket, text: String) -> bool {
        if self.is_connected() {
            self.attempts = 0;
        }

        if let Some(segments) = self.segments.as_mut() {
            segments.buf.push_str(&text);
            segments.remaining -= 1;
            if segments.remaining > 0 {
                return false;
            }
            let whole = self.segments.take().map(|s| s.buf).unwrap_or_default();
            trace!(bytes = whole.len(), "segmented message reassembled");
            self.on_reassembled(&whole);
            return false;
        }

        self.on_message(socket, &text)
    }

    /// A reassembled message always fills the big-payload slot.
    fn on_reassembled(&mut self, text: &str) {
        match frame::decode_segmented(text) {
            Ok(envelope) => self.cache_big_payload(envelope),
            Err(e) => warn!(error = %e, "dropping segmented message"),
        }
    }

    fn cache_big_payload(&mut self, envelope: Envelope) {
        if self.big_payload.is_some() {
            warn!("big payload replaced before its response arrived");
        }
        self.big_payload = Some(envelope);
    }

    fn on_message(&mut self, socket: &Socket, text: &str) -> bool {
        let inbound = match frame::decode_frame(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "dropping frame");
                return false;
            }
        };

        match inbound {
            Inbound::SegmentCount(0) => {
                trace!("empty segment announcement");
                false
            }
            Inbound::SegmentCount(n) => {
                self.segments = Some(Segments {
                    remaining: n,
                    buf: String::new(),
                });
                false
            }
            Inbound::Connected => {
                self.on_connected(socket);
                true
            }
            Inbound::Response { id, envelope } => {
                self.complete(id, envelope);
                false
            }
            Inbound::Push(push) => {
                debug!(path = %push.path, "push notification");
                let _ = self.events.send(SessionEvent::Push(push));
                false
            }
            Inbound::BigPayload(envelope) => {
                self.cache_big_payload(envelope);
                false
            }
        }
    }

    fn on_connected(&mut self, socket: &Socket) {
        self.set_state(SessionState::Connected);
        self.attempts = 0;
        info!("session connected");

        for (id, pending) in self.pending.iter_mut().filter(|(_, p)| !p.sent) {
            pending.sent = socket.send(pending.frame.clone());
            debug!(id, "queued request sent");
        }

        let _ = self.events.send(SessionEvent::Connected);
    }

    fn complete(&mut self, id: u64, envelope: Envelope) {
        let Some(pending) = self.pending.remove(&id) else {
            trace!(id, "response for unknown request");
            return;
        };

        let status = envelope
            .b
            .as_ref()
            .and_then(|b| b.s.clone())
            .unwrap_or_default();

        if status == STATUS_OK {
            let response = Response::assemble(id, envelope, self.big_payload.take());
            let _ = pending.reply.send(Ok(response));
        } else {
            warn!(id, %status, "request rejected");
            let _ = pending.reply.send(Err(SpacebookError::protocol(format!(
                "request {id} failed with status {status:?}"
            ))));
        }
    }

    /// Allocate an id and record the request. Returns `None` if it could not
    /// be encoded (the caller has already been answered).
    fn register(&mut self, payload: Value, reply: oneshot::Sender<Result<Response>>) -> Option<u64> {
        let id = self.next_id;
        self.next_id += 1;

        match frame::encode_request(id, &payload) {
            Ok(frame) => {
                self.pending.insert(
                    id,
                    PendingRequest {
                        frame,
                        reply,
                        sent: false,
                    },
                );
                Some(id)
            }
            Err(e) => {
                let _ = reply.send(Err(e));
                None
            }
        }
    }

    fn transmit(&mut self, socket: &Socket, id: u64) {
        if let Some(pending) = self.pending.get_mut(&id) {
            pending.sent = socket.send(pending.frame.clone());
            debug!(id, "request sent");
        }
    }

    /// Handle a command while no connection is usable. Returns `false` when
    /// the session must shut down.
    fn accept_offline(&mut self, cmd: Option<Command>) -> bool {
        match cmd {
            Some(Command::Request { payload, reply }) => {
                self.register(payload, reply);
                true
            }
            Some(Command::Close) | None => false,
        }
    }

    /// Back off before the next attempt. `Ok(false)` means the session was
    /// closed while waiting.
    async fn wait_before_retry(&mut self, reason: String) -> Result<bool> {
        self.set_state(SessionState::Connecting);
        self.segments = None;
        self.big_payload = None;

        if self.attempts == 0 {
            info!(%reason, "connection lost, reconnecting");
            let _ = self.events.send(SessionEvent::Reconnecting);
        }

        let Some(delay) = self.policy.delay_for_attempt(self.attempts) else {
            let message = format!("gave up after {} attempts: {reason}", self.attempts);
            error!(%message, "reconnect budget exhausted");
            let _ = self.fatal.set(message.clone());
            self.shutdown();
            let _ = self.events.send(SessionEvent::Fatal(message.clone()));
            return Err(SpacebookError::transport(message));
        };

        warn!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            %reason,
            "scheduling reconnect"
        );
        self.attempts += 1;

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(true),
                cmd = self.commands.recv() => {
                    if !self.accept_offline(cmd) {
                        self.shutdown();
                        return Ok(false);
                    }
                }
            }
        }
    }

    fn shutdown(&mut self) {
        self.set_state(SessionState::Closed);
        self.commands.close();
        self.pending.clear();
        self.segments = None;
        self.big_payload = None;
        debug!("session closed");
    }

    fn is_connected(&self) -> bool {
        *self.state.borrow() == SessionState::Connected
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }
}
