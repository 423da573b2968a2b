//! WebSocket transport over tokio-tungstenite

use super::{Connector, Transport, TransportEvent, TransportEvents};
use agentlink_common::{Result, TunnelError};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Give up on a WebSocket handshake after this long.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens tunnel connections with `tokio_tungstenite::connect_async`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: &str, events: TransportEvents) -> Box<dyn Transport> {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let (closed_tx, closed_rx) = watch::channel(false);

        let task = tokio::spawn(run_connection(
            url.to_string(),
            self.connect_timeout,
            events,
            outgoing_rx,
            open.clone(),
            closed_tx,
        ));

        Box::new(WsTransport {
            outgoing: outgoing_tx,
            open,
            closed: closed_rx,
            task,
        })
    }
}

enum Outgoing {
    Text(String),
    Close,
}

struct WsTransport {
    outgoing: mpsc::UnboundedSender<Outgoing>,
    open: Arc<AtomicBool>,
    closed: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl Transport for WsTransport {
    fn send(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(TunnelError::Connection("transport is not open".into()));
        }
        self.outgoing
            .send(Outgoing::Text(text))
            .map_err(|_| TunnelError::Connection("transport task has exited".into()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&mut self) -> BoxFuture<'static, ()> {
        self.open.store(false, Ordering::Release);
        let _ = self.outgoing.send(Outgoing::Close);
        let mut closed = self.closed.clone();
        Box::pin(async move {
            let _ = closed.wait_for(|done| *done).await;
        })
    }

    fn terminate(&mut self) {
        self.open.store(false, Ordering::Release);
        self.task.abort();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_connection(
    url: String,
    connect_timeout: Duration,
    events: TransportEvents,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    open: Arc<AtomicBool>,
    closed: watch::Sender<bool>,
) {
    let connect = tokio_tungstenite::connect_async(url.as_str());
    let ws = match tokio::time::timeout(connect_timeout, connect).await {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            events.emit(TransportEvent::Error(e.to_string()));
            let _ = closed.send(true);
            return;
        }
        Err(_) => {
            events.emit(TransportEvent::Error(format!(
                "WebSocket handshake timed out after {connect_timeout:?}"
            )));
            let _ = closed.send(true);
            return;
        }
    };

    open.store(true, Ordering::Release);
    events.emit(TransportEvent::Opened);

    let (mut sink, mut stream) = ws.split();
    let mut closing = false;

    let terminal = loop {
        tokio::select! {
            next = outgoing.recv(), if !closing => match next {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        break Some(TransportEvent::Error(e.to_string()));
                    }
                }
                Some(Outgoing::Close) | None => {
                    debug!("Sending close frame");
                    open.store(false, Ordering::Release);
                    closing = true;
                    if sink.send(Message::Close(None)).await.is_err() {
                        break None;
                    }
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    events.emit(TransportEvent::Message(text.to_string()));
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => events.emit(TransportEvent::Message(text)),
                    Err(_) => warn!("Ignoring non-UTF-8 binary frame ({} bytes)", data.len()),
                },
                Some(Ok(Message::Ping(payload))) => {
                    debug!("Ping received, answering with pong");
                    if let Err(e) = sink.send(Message::Pong(payload)).await {
                        break Some(TransportEvent::Error(e.to_string()));
                    }
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                        .unwrap_or_default();
                    let _ = sink.close().await;
                    break Some(TransportEvent::Closed { code, reason });
                }
                Some(Err(e)) => break Some(TransportEvent::Error(e.to_string())),
                None => {
                    break Some(TransportEvent::Closed {
                        code: None,
                        reason: "connection ended".into(),
                    });
                }
            },
        }
    };

    open.store(false, Ordering::Release);
    if let Some(event) = terminal {
        events.emit(event);
    }
    let _ = closed.send(true);
}
