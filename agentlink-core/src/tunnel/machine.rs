//! The tunnel state machine
//!
//! [`TunnelMachine`] is the single owner of the tunnel: its state, context,
//! transport, timers and pending public calls. It is synchronous; all
//! asynchronous work (connecting, timers, closing, forwarding) runs in
//! spawned tasks that report back as [`Input`] values on one channel, and
//! the owner feeds those inputs back in one at a time.
//!
//! [`TunnelMachine::transition`] is the only place the state changes. Entry
//! actions may fire further events, always as their last statement.

use super::pending::Pending;
use super::router::{self, Forward};
use super::state::{next_state, TunnelEvent, TunnelState};
use crate::auth::validate_api_key;
use crate::reconnect::Backoff;
use crate::transport::{Connector, Transport, TransportEvent, TransportEvents};
use agentlink_common::{
    AuthErrorCode, Result, TunnelConfig, TunnelError, ACK_TIMEOUT, CLOSE_GRACE_PERIOD,
};
use agentlink_protocol::{ClientMessage, Registration, RequestData, ResponseData, ServerMessage};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub type ConnectedHook = Arc<dyn Fn(bool) + Send + Sync>;
pub type RequestHook = Arc<dyn Fn(&RequestData) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&TunnelError) + Send + Sync>;

/// User hooks invoked from the state machine
#[derive(Clone, Default)]
pub struct Callbacks {
    /// Called on every entry into `connected`; the flag is true for reconnects
    pub on_connected: Option<ConnectedHook>,
    /// Called for every inbound request before it is forwarded
    pub on_request: Option<RequestHook>,
    /// Called when the tunnel fails
    pub on_error: Option<ErrorHook>,
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_connected", &self.on_connected.is_some())
            .field("on_request", &self.on_request.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Mutable data carried across transitions, reset on entry into `starting`
#[derive(Debug, Clone, Default)]
pub struct TunnelContext {
    pub reconnect_attempts: u32,
    /// First disconnect since the last successful connect
    pub disconnected_at: Option<Instant>,
    pub has_connected_once: bool,
    pub last_error: Option<TunnelError>,
}

/// Everything the machine reacts to besides public calls
#[derive(Debug)]
pub(crate) enum Input {
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    TimerFired(u64),
    CleanupComplete(u64),
    Respond(ResponseData),
}

struct Link {
    generation: u64,
    transport: Box<dyn Transport>,
}

struct Timer {
    id: u64,
    handle: JoinHandle<()>,
}

pub(crate) struct TunnelMachine {
    config: TunnelConfig,
    url: String,
    connector: Arc<dyn Connector>,
    forwarder: Arc<dyn Forward>,
    callbacks: Callbacks,
    backoff: Backoff,
    inputs: mpsc::UnboundedSender<Input>,
    state_tx: watch::Sender<TunnelState>,

    state: TunnelState,
    context: TunnelContext,
    local_port: Option<u16>,
    registration: Option<Registration>,

    link: Option<Link>,
    next_generation: u64,
    delay_timer: Option<Timer>,
    ack_timer: Option<Timer>,
    cleanup: Option<u64>,
    next_task_id: u64,

    pending_start: Option<Pending<Registration>>,
    pending_graceful: Option<Pending<()>>,
    pending_stop: Option<Pending<()>>,

    #[cfg(test)]
    pub(crate) trail: Vec<TunnelState>,
}

impl TunnelMachine {
    pub(crate) fn new(
        config: TunnelConfig,
        url: String,
        connector: Arc<dyn Connector>,
        forwarder: Arc<dyn Forward>,
        callbacks: Callbacks,
        inputs: mpsc::UnboundedSender<Input>,
    ) -> Self {
        let backoff = Backoff::new(config.backoff.clone());
        let (state_tx, _) = watch::channel(TunnelState::Idle);
        Self {
            config,
            url,
            connector,
            forwarder,
            callbacks,
            backoff,
            inputs,
            state_tx,
            state: TunnelState::Idle,
            context: TunnelContext::default(),
            local_port: None,
            registration: None,
            link: None,
            next_generation: 0,
            delay_timer: None,
            ack_timer: None,
            cleanup: None,
            next_task_id: 0,
            pending_start: None,
            pending_graceful: None,
            pending_stop: None,
            #[cfg(test)]
            trail: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> TunnelState {
        self.state
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<TunnelState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn registration(&self) -> Option<Registration> {
        self.registration.clone()
    }

    /// Connected and the transport can carry frames.
    pub(crate) fn is_connected(&self) -> bool {
        self.state == TunnelState::Connected && self.link_open()
    }

    // ---- public operations -------------------------------------------------

    pub(crate) fn start(&mut self, local_port: u16, reply: oneshot::Sender<Result<Registration>>) {
        let previous_port = self.local_port.replace(local_port);
        let previous = self.pending_start.replace(Pending::new(reply));

        if !self.transition(TunnelEvent::Start) {
            self.local_port = previous_port;
            let ours = std::mem::replace(&mut self.pending_start, previous);
            if let Some(ours) = ours {
                ours.reject(TunnelError::InvalidState(format!(
                    "cannot start tunnel while {}",
                    self.state
                )));
            }
        }
    }

    /// Stop the tunnel. `reply` is `None` when the owner itself shuts down.
    pub(crate) fn stop(&mut self, reply: Option<oneshot::Sender<Result<()>>>) {
        match self.state {
            TunnelState::Stopped => {
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
            TunnelState::Stopping => {
                let pending = self.pending_stop.get_or_insert_with(Pending::detached);
                if let Some(reply) = reply {
                    pending.chain(reply);
                }
            }
            _ => {
                self.pending_stop = Some(reply.map_or_else(Pending::detached, Pending::new));
                if !self.transition(TunnelEvent::Stop) {
                    if let Some(pending) = self.pending_stop.take() {
                        pending.resolve(());
                    }
                }
            }
        }
    }

    pub(crate) fn graceful_reconnect(&mut self, reply: oneshot::Sender<Result<()>>) {
        if let Some(pending) = self.pending_graceful.as_mut() {
            pending.chain(reply);
            return;
        }
        if self.state != TunnelState::Connected {
            warn!("Graceful reconnect requested while {}; ignoring", self.state);
            let _ = reply.send(Ok(()));
            return;
        }

        self.context.reconnect_attempts = 0;
        self.pending_graceful = Some(Pending::new(reply));
        if !self.transition(TunnelEvent::GracefulReconnect) {
            if let Some(pending) = self.pending_graceful.take() {
                pending.resolve(());
            }
        }
    }

    pub(crate) fn handle(&mut self, input: Input) {
        match input {
            Input::Transport { generation, event } => self.on_transport_event(generation, event),
            Input::TimerFired(id) => self.on_timer(id),
            Input::CleanupComplete(id) => {
                if self.cleanup == Some(id) {
                    self.cleanup = None;
                    self.transition(TunnelEvent::CleanupComplete);
                }
            }
            Input::Respond(response) => self.respond(response),
        }
    }

    // ---- transitions ---------------------------------------------------------

    /// Apply `event` to the current state. Returns false, with no side
    /// effects, when the table has no entry for the pair.
    pub(crate) fn transition(&mut self, event: TunnelEvent) -> bool {
        let from = self.state;
        let Some(to) = next_state(from, event) else {
            warn!("Invalid tunnel transition: {} in state {}", event, from);
            return false;
        };

        debug!("Tunnel {} --{}--> {}", from, event, to);
        self.exit(from);
        self.state = to;
        self.state_tx.send_replace(to);
        #[cfg(test)]
        self.trail.push(to);
        self.enter(to, from);
        true
    }

    fn exit(&mut self, state: TunnelState) {
        match state {
            TunnelState::ReconnectDelay => self.clear_delay_timer(),
            TunnelState::AwaitingReconnectAck => self.clear_ack_timer(),
            _ => {}
        }
    }

    fn enter(&mut self, state: TunnelState, from: TunnelState) {
        match state {
            TunnelState::Idle => {}
            TunnelState::Starting => self.enter_starting(),
            TunnelState::Connecting => self.enter_connecting(),
            TunnelState::Authenticating => self.enter_authenticating(),
            TunnelState::Connected => self.enter_connected(),
            TunnelState::AwaitingReconnectAck => self.enter_awaiting_reconnect_ack(),
            TunnelState::ReconnectDelay => self.enter_reconnect_delay(from),
            TunnelState::Stopping => self.enter_stopping(),
            TunnelState::Failed => self.enter_failed(),
            TunnelState::Stopped => self.enter_stopped(),
        }
    }

    fn enter_starting(&mut self) {
        self.context = TunnelContext::default();
        self.registration = None;
        match validate_api_key(self.config.api_key.as_deref()) {
            Ok(()) => {
                self.transition(TunnelEvent::SetupComplete);
            }
            Err(e) => {
                error!("Tunnel setup failed: {}", e);
                self.context.last_error = Some(e);
                self.transition(TunnelEvent::SetupFailed);
            }
        }
    }

    fn enter_connecting(&mut self) {
        if let Some(mut stale) = self.link.take() {
            debug!("Discarding stale transport (generation {})", stale.generation);
            stale.transport.terminate();
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let inputs = self.inputs.clone();
        let events = TransportEvents::new(move |event| {
            let _ = inputs.send(Input::Transport { generation, event });
        });

        info!("Connecting to {}", self.url);
        let transport = self.connector.connect(&self.url, events);
        self.link = Some(Link {
            generation,
            transport,
        });
    }

    fn enter_authenticating(&mut self) {
        let auth = ClientMessage::Auth {
            api_key: self.config.api_key.clone().unwrap_or_default(),
            local_port: self.local_port.unwrap_or_default(),
        };
        debug!("Sending auth frame for local port {}", self.local_port.unwrap_or_default());
        if let Err(e) = self.send(&auth) {
            warn!("Failed to send auth frame: {}", e);
        }
    }

    fn enter_connected(&mut self) {
        self.context.reconnect_attempts = 0;
        let is_reconnect = self.context.has_connected_once;
        if let Some(since) = self.context.disconnected_at.take() {
            info!(
                "Tunnel reconnected after {} ms offline",
                since.elapsed().as_millis()
            );
        } else if is_reconnect {
            info!("Tunnel reconnected");
        } else {
            info!("Tunnel connected");
        }
        self.context.has_connected_once = true;

        let registration = self.registration.clone().unwrap_or_default();
        if let Some(pending) = self.pending_start.take() {
            pending.resolve(registration);
        }
        if let Some(pending) = self.pending_graceful.take() {
            pending.resolve(());
        }
        if let Some(on_connected) = &self.callbacks.on_connected {
            on_connected(is_reconnect);
        }
    }

    fn enter_awaiting_reconnect_ack(&mut self) {
        if !self.link_open() {
            debug!("No live transport for graceful reconnect; reconnecting directly");
            self.transition(TunnelEvent::AckTimeout);
            return;
        }
        info!("Announcing graceful reconnect");
        if let Err(e) = self.send(&ClientMessage::WillReconnect) {
            warn!("Failed to send will-reconnect: {}", e);
        }
        self.ack_timer = Some(self.schedule(ACK_TIMEOUT));
    }

    fn enter_reconnect_delay(&mut self, from: TunnelState) {
        if self.context.disconnected_at.is_none() {
            self.context.disconnected_at = Some(Instant::now());
        }
        self.context.reconnect_attempts += 1;
        let attempt = self.context.reconnect_attempts;
        let max = self.config.max_reconnect_attempts;

        if attempt > max {
            let err = TunnelError::MaxRetries { attempts: max };
            error!("{}", err);
            self.context.last_error = Some(err);
            self.transition(TunnelEvent::MaxRetries);
            return;
        }

        let delay = self.backoff.delay_for_attempt(attempt);
        if from == TunnelState::AwaitingReconnectAck {
            self.drop_link();
        }
        info!(
            "Reconnecting in {} ms (attempt {}/{})",
            delay.as_millis(),
            attempt,
            max
        );
        self.delay_timer = Some(self.schedule(delay));
    }

    fn enter_stopping(&mut self) {
        self.clear_delay_timer();
        self.clear_ack_timer();

        // Taking the link detaches its event subscription.
        let Some(link) = self.link.take() else {
            self.transition(TunnelEvent::CleanupComplete);
            return;
        };

        info!("Closing tunnel transport");
        let mut transport = link.transport;
        let closed = transport.close();
        let id = self.next_task_id();
        self.cleanup = Some(id);
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            if tokio::time::timeout(CLOSE_GRACE_PERIOD, closed).await.is_err() {
                warn!(
                    "Transport did not close within {:?}; terminating",
                    CLOSE_GRACE_PERIOD
                );
                transport.terminate();
            }
            let _ = inputs.send(Input::CleanupComplete(id));
        });
    }

    fn enter_failed(&mut self) {
        self.drop_link();
        let err = self
            .context
            .last_error
            .clone()
            .unwrap_or_else(|| TunnelError::Connection("tunnel failed".into()));
        error!("Tunnel failed: {}", err);

        if let Some(pending) = self.pending_start.take() {
            pending.reject(err.clone());
        }
        if let Some(pending) = self.pending_graceful.take() {
            pending.reject(err.clone());
        }
        if let Some(on_error) = &self.callbacks.on_error {
            on_error(&err);
        }
    }

    fn enter_stopped(&mut self) {
        info!("Tunnel stopped");
        if let Some(pending) = self.pending_graceful.take() {
            pending.resolve(());
        }
        if let Some(pending) = self.pending_start.take() {
            pending.reject(TunnelError::Stopped);
        }
        if let Some(pending) = self.pending_stop.take() {
            pending.resolve(());
        }
    }

    // ---- inbound -------------------------------------------------------------

    fn on_transport_event(&mut self, generation: u64, event: TransportEvent) {
        let current = self.link.as_ref().map(|link| link.generation);
        if current != Some(generation) {
            debug!("Dropping event from detached transport {}", generation);
            return;
        }

        match event {
            TransportEvent::Opened => {
                debug!("Transport open");
                self.transition(TunnelEvent::WsOpen);
            }
            TransportEvent::Message(text) => self.dispatch(&text),
            TransportEvent::Closed { code, reason } => {
                warn!("Tunnel connection closed (code {:?}): {}", code, reason);
                self.transition(TunnelEvent::WsClose);
            }
            TransportEvent::Error(message) => {
                warn!("Tunnel connection error: {}", message);
                self.context.last_error = Some(TunnelError::Connection(message));
                self.transition(TunnelEvent::WsError);
            }
        }
    }

    fn dispatch(&mut self, text: &str) {
        let message = match ServerMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed frame: {}", e);
                return;
            }
        };

        match message {
            ServerMessage::Error { error, message } => {
                let code = AuthErrorCode::classify(&error);
                match code {
                    AuthErrorCode::Timeout => {
                        error!("Proxy timed out waiting for auth: {}", message);
                    }
                    AuthErrorCode::Required => {
                        error!("Proxy requires authentication: {}", message);
                    }
                    AuthErrorCode::Failed => error!("Proxy rejected the API key: {}", message),
                    AuthErrorCode::Other => error!("Proxy error {}: {}", error, message),
                }
                let message = if message.is_empty() { error } else { message };
                self.context.last_error = Some(TunnelError::Authentication { code, message });
                self.transition(TunnelEvent::AuthError);
            }
            ServerMessage::Registered { data } => {
                info!(
                    "Tunnel registered: id={} url={}",
                    data.tunnel_id, data.public_url
                );
                self.registration = Some(data);
                self.transition(TunnelEvent::AuthSuccess);
            }
            ServerMessage::WillReconnectAck { data } => {
                info!(
                    "Proxy will buffer requests for {} ms",
                    data.buffer_timeout
                );
                self.transition(TunnelEvent::ReconnectAck);
            }
            ServerMessage::Request { data } => self.route(data),
            ServerMessage::Unknown => debug!("Ignoring frame of unknown type"),
        }
    }

    fn route(&mut self, request: RequestData) {
        if let Some(on_request) = &self.callbacks.on_request {
            on_request(&request);
        }
        let Some(local_port) = self.local_port else {
            warn!("Request {} arrived before a local port was set", request.id);
            return;
        };

        debug!("{} {} (id {})", request.method, request.path, request.id);
        let forwarder = self.forwarder.clone();
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            let response = router::handle_request(forwarder.as_ref(), local_port, request).await;
            let _ = inputs.send(Input::Respond(response));
        });
    }

    fn respond(&mut self, response: ResponseData) {
        if !self.link_open() {
            // The proxy will time the request out on its side.
            warn!("Transport not open; dropping response {}", response.id);
            return;
        }
        let id = response.id.clone();
        if let Err(e) = self.send(&ClientMessage::Response { data: response }) {
            warn!("Failed to send response {}: {}", id, e);
        }
    }

    fn on_timer(&mut self, id: u64) {
        if self.delay_timer.as_ref().is_some_and(|t| t.id == id) {
            self.transition(TunnelEvent::DelayComplete);
        } else if self.ack_timer.as_ref().is_some_and(|t| t.id == id) {
            warn!(
                "No will-reconnect-ack within {} ms; reconnecting anyway",
                ACK_TIMEOUT.as_millis()
            );
            self.transition(TunnelEvent::AckTimeout);
        } else {
            debug!("Ignoring expired timer {}", id);
        }
    }

    // ---- resources -----------------------------------------------------------

    fn send(&self, message: &ClientMessage) -> Result<()> {
        let link = self
            .link
            .as_ref()
            .ok_or_else(|| TunnelError::Connection("no transport".into()))?;
        let text = message.encode()?;
        debug!("Sending {} frame", message.kind());
        link.transport.send(text)
    }

    fn link_open(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.transport.is_open())
    }

    fn drop_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.transport.terminate();
        }
    }

    fn next_task_id(&mut self) -> u64 {
        self.next_task_id += 1;
        self.next_task_id
    }

    fn schedule(&mut self, delay: Duration) -> Timer {
        let id = self.next_task_id();
        let inputs = self.inputs.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inputs.send(Input::TimerFired(id));
        });
        Timer { id, handle }
    }

    fn clear_delay_timer(&mut self) {
        if let Some(timer) = self.delay_timer.take() {
            timer.handle.abort();
        }
    }

    fn clear_ack_timer(&mut self) {
        if let Some(timer) = self.ack_timer.take() {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
impl TunnelMachine {
    pub(crate) fn context(&self) -> &TunnelContext {
        &self.context
    }

    pub(crate) fn has_delay_timer(&self) -> bool {
        self.delay_timer.is_some()
    }

    pub(crate) fn has_ack_timer(&self) -> bool {
        self.ack_timer.is_some()
    }

    pub(crate) fn pending_counts(&self) -> (usize, usize, usize) {
        (
            self.pending_start.as_ref().map_or(0, Pending::len),
            self.pending_graceful.as_ref().map_or(0, Pending::len),
            self.pending_stop.as_ref().map_or(0, Pending::len),
        )
    }
}
