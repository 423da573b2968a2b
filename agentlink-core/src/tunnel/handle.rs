//! Public control surface for a running tunnel
//!
//! A [`Tunnel`] is a cheap, cloneable handle to the task that owns the
//! state machine. Every call is a message to that task, so calls from many
//! handles are applied strictly one after another.

use super::machine::{Callbacks, Input, TunnelMachine};
use super::router::Forward;
use super::state::TunnelState;
use crate::transport::{websocket_url, Connector};
use agentlink_common::{Result, TunnelConfig, TunnelError};
use agentlink_protocol::Registration;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

enum Command {
    Start {
        local_port: u16,
        reply: oneshot::Sender<Result<Registration>>,
    },
    Stop {
        reply: oneshot::Sender<Result<()>>,
    },
    GracefulReconnect {
        reply: oneshot::Sender<Result<()>>,
    },
    IsConnected {
        reply: oneshot::Sender<bool>,
    },
    Registration {
        reply: oneshot::Sender<Option<Registration>>,
    },
}

/// Handle to a tunnel
///
/// Dropping the last handle stops the tunnel.
#[derive(Debug, Clone)]
pub struct Tunnel {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<TunnelState>,
}

impl Tunnel {
    /// Create an idle tunnel on the current tokio runtime.
    ///
    /// Fails when the configuration is invalid or no runtime is running.
    pub fn spawn(
        config: TunnelConfig,
        connector: Arc<dyn Connector>,
        forwarder: Arc<dyn Forward>,
        callbacks: Callbacks,
    ) -> Result<Self> {
        config.validate()?;
        let url = websocket_url(&config.server_url)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TunnelError::Config(format!("a tokio runtime is required: {e}")))?;

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let machine = TunnelMachine::new(config, url, connector, forwarder, callbacks, input_tx);
        let state = machine.subscribe();

        runtime.spawn(run(machine, command_rx, input_rx));

        Ok(Self {
            commands: command_tx,
            state,
        })
    }

    /// Connect and register, forwarding requests to `local_port`.
    ///
    /// Resolves once the proxy accepts the credential. Fails with a setup
    /// error, an authentication error, exhausted retries, or
    /// [`TunnelError::Stopped`] if `stop` wins the race.
    pub async fn start(&self, local_port: u16) -> Result<Registration> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { local_port, reply })?;
        rx.await.map_err(|_| actor_gone())?
    }

    /// Close the transport and settle in `stopped`. Concurrent calls share
    /// one shutdown.
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply })?;
        rx.await.map_err(|_| actor_gone())?
    }

    /// Ask the proxy to buffer requests, then reconnect.
    ///
    /// Resolves when the next connection is registered; a no-op unless
    /// connected.
    pub async fn graceful_reconnect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GracefulReconnect { reply })?;
        rx.await.map_err(|_| actor_gone())?
    }

    /// Connected and the transport is open.
    pub async fn is_connected(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::IsConnected { reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Details from the most recent `registered` frame.
    pub async fn registration(&self) -> Option<Registration> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Registration { reply }).ok()?;
        rx.await.ok().flatten()
    }

    pub fn state(&self) -> TunnelState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TunnelState> {
        self.state.clone()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| actor_gone())
    }
}

fn actor_gone() -> TunnelError {
    TunnelError::InvalidState("tunnel task is no longer running".into())
}

async fn run(
    mut machine: TunnelMachine,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut inputs: mpsc::UnboundedReceiver<Input>,
) {
    let mut handles_alive = true;
    loop {
        tokio::select! {
            command = commands.recv(), if handles_alive => match command {
                Some(command) => apply(&mut machine, command),
                None => {
                    info!("Last tunnel handle dropped; stopping");
                    handles_alive = false;
                    machine.stop(None);
                }
            },
            Some(input) = inputs.recv() => machine.handle(input),
        }

        if !handles_alive && machine.state() == TunnelState::Stopped {
            break;
        }
    }
    debug!("Tunnel task finished");
}

fn apply(machine: &mut TunnelMachine, command: Command) {
    match command {
        Command::Start { local_port, reply } => machine.start(local_port, reply),
        Command::Stop { reply } => machine.stop(Some(reply)),
        Command::GracefulReconnect { reply } => machine.graceful_reconnect(reply),
        Command::IsConnected { reply } => {
            let _ = reply.send(machine.is_connected());
        }
        Command::Registration { reply } => {
            let _ = reply.send(machine.registration());
        }
    }
}
