//! Tunnel states, events and the transition table

use std::fmt;

/// Lifecycle state of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelState {
    Idle,
    Starting,
    Connecting,
    Authenticating,
    Connected,
    AwaitingReconnectAck,
    ReconnectDelay,
    Stopping,
    Failed,
    Stopped,
}

impl TunnelState {
    pub const ALL: [TunnelState; 10] = [
        TunnelState::Idle,
        TunnelState::Starting,
        TunnelState::Connecting,
        TunnelState::Authenticating,
        TunnelState::Connected,
        TunnelState::AwaitingReconnectAck,
        TunnelState::ReconnectDelay,
        TunnelState::Stopping,
        TunnelState::Failed,
        TunnelState::Stopped,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TunnelState::Idle => "idle",
            TunnelState::Starting => "starting",
            TunnelState::Connecting => "connecting",
            TunnelState::Authenticating => "authenticating",
            TunnelState::Connected => "connected",
            TunnelState::AwaitingReconnectAck => "awaiting_reconnect_ack",
            TunnelState::ReconnectDelay => "reconnect_delay",
            TunnelState::Stopping => "stopping",
            TunnelState::Failed => "failed",
            TunnelState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trigger for a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelEvent {
    Start,
    SetupComplete,
    SetupFailed,
    Stop,
    CleanupComplete,
    GracefulReconnect,
    WsOpen,
    WsClose,
    WsError,
    AuthSuccess,
    AuthError,
    ReconnectAck,
    DelayComplete,
    AckTimeout,
    MaxRetries,
}

impl TunnelEvent {
    pub const ALL: [TunnelEvent; 15] = [
        TunnelEvent::Start,
        TunnelEvent::SetupComplete,
        TunnelEvent::SetupFailed,
        TunnelEvent::Stop,
        TunnelEvent::CleanupComplete,
        TunnelEvent::GracefulReconnect,
        TunnelEvent::WsOpen,
        TunnelEvent::WsClose,
        TunnelEvent::WsError,
        TunnelEvent::AuthSuccess,
        TunnelEvent::AuthError,
        TunnelEvent::ReconnectAck,
        TunnelEvent::DelayComplete,
        TunnelEvent::AckTimeout,
        TunnelEvent::MaxRetries,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TunnelEvent::Start => "START",
            TunnelEvent::SetupComplete => "SETUP_COMPLETE",
            TunnelEvent::SetupFailed => "SETUP_FAILED",
            TunnelEvent::Stop => "STOP",
            TunnelEvent::CleanupComplete => "CLEANUP_COMPLETE",
            TunnelEvent::GracefulReconnect => "GRACEFUL_RECONNECT",
            TunnelEvent::WsOpen => "WS_OPEN",
            TunnelEvent::WsClose => "WS_CLOSE",
            TunnelEvent::WsError => "WS_ERROR",
            TunnelEvent::AuthSuccess => "AUTH_SUCCESS",
            TunnelEvent::AuthError => "AUTH_ERROR",
            TunnelEvent::ReconnectAck => "RECONNECT_ACK",
            TunnelEvent::DelayComplete => "DELAY_COMPLETE",
            TunnelEvent::AckTimeout => "ACK_TIMEOUT",
            TunnelEvent::MaxRetries => "MAX_RETRIES",
        }
    }
}

impl fmt::Display for TunnelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transition table. `None` means the event is not accepted in `state`.
pub fn next_state(state: TunnelState, event: TunnelEvent) -> Option<TunnelState> {
    use TunnelEvent as E;
    use TunnelState as S;

    let next = match (state, event) {
        (S::Idle, E::Start) => S::Starting,
        (S::Idle, E::Stop) => S::Stopped,

        (S::Starting, E::SetupComplete) => S::Connecting,
        (S::Starting, E::SetupFailed) => S::Failed,
        (S::Starting, E::Stop) => S::Stopping,

        (S::Connecting, E::WsOpen) => S::Authenticating,
        (S::Connecting, E::WsClose | E::WsError) => S::ReconnectDelay,
        (S::Connecting, E::Stop) => S::Stopping,

        (S::Authenticating, E::AuthSuccess) => S::Connected,
        (S::Authenticating, E::AuthError) => S::Failed,
        (S::Authenticating, E::WsClose | E::WsError) => S::ReconnectDelay,
        (S::Authenticating, E::Stop) => S::Stopping,

        (S::Connected, E::WsClose | E::WsError) => S::ReconnectDelay,
        (S::Connected, E::GracefulReconnect) => S::AwaitingReconnectAck,
        (S::Connected, E::Stop) => S::Stopping,

        (
            S::AwaitingReconnectAck,
            E::ReconnectAck | E::AckTimeout | E::WsClose | E::WsError,
        ) => S::ReconnectDelay,
        (S::AwaitingReconnectAck, E::Stop) => S::Stopping,

        (S::ReconnectDelay, E::DelayComplete) => S::Connecting,
        (S::ReconnectDelay, E::MaxRetries) => S::Failed,
        (S::ReconnectDelay, E::Stop) => S::Stopping,

        (S::Stopping, E::CleanupComplete) => S::Stopped,

        (S::Failed, E::Stop) => S::Stopped,
        (S::Failed, E::Start) => S::Starting,

        (S::Stopped, E::Start) => S::Starting,

        _ => return None,
    };
    Some(next)
}
