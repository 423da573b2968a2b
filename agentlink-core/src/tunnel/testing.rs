//! In-memory transport and forwarder used by the state machine tests

use super::machine::{Callbacks, Input, TunnelMachine};
use super::router::{Forward, ForwardRequest, ForwardedResponse};
use crate::transport::{Connector, Transport, TransportEvent, TransportEvents};
use agentlink_common::{Result, TunnelConfig, TunnelError};
use agentlink_protocol::Registration;
use futures::future::{self, BoxFuture};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

pub(crate) const TEST_URL: &str = "wss://proxy.test/ws";
pub(crate) const TEST_KEY: &str = "test-key";
pub(crate) const TEST_PORT: u16 = 7378;

#[derive(Default)]
struct Shared {
    open: AtomicBool,
    terminated: AtomicBool,
    close_calls: AtomicUsize,
    hang_on_close: AtomicBool,
    sent: Mutex<Vec<String>>,
}

/// One connection opened through [`MockConnector`], seen from the far end.
#[derive(Clone)]
pub(crate) struct MockConnection {
    pub(crate) url: String,
    events: TransportEvents,
    shared: Arc<Shared>,
}

impl MockConnection {
    pub(crate) fn accept(&self) {
        self.shared.open.store(true, Ordering::SeqCst);
        self.events.emit(TransportEvent::Opened);
    }

    pub(crate) fn receive(&self, frame: serde_json::Value) {
        self.events.emit(TransportEvent::Message(frame.to_string()));
    }

    pub(crate) fn receive_raw(&self, text: &str) {
        self.events.emit(TransportEvent::Message(text.to_string()));
    }

    /// The proxy goes away without a close handshake.
    pub(crate) fn drop_remote(&self) {
        self.shared.open.store(false, Ordering::SeqCst);
        self.events.emit(TransportEvent::Closed {
            code: Some(1006),
            reason: "abnormal closure".into(),
        });
    }

    pub(crate) fn fail(&self, message: &str) {
        self.shared.open.store(false, Ordering::SeqCst);
        self.events.emit(TransportEvent::Error(message.to_string()));
    }

    pub(crate) fn sent(&self) -> Vec<serde_json::Value> {
        self.shared
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub(crate) fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|frame| frame["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.shared.close_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::SeqCst)
    }
}

struct MockTransport {
    shared: Arc<Shared>,
}

impl Transport for MockTransport {
    fn send(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(TunnelError::Connection("not open".into()));
        }
        self.shared.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn close(&mut self) -> BoxFuture<'static, ()> {
        self.shared.close_calls.fetch_add(1, Ordering::SeqCst);
        self.shared.open.store(false, Ordering::SeqCst);
        if self.shared.hang_on_close.load(Ordering::SeqCst) {
            Box::pin(future::pending())
        } else {
            Box::pin(future::ready(()))
        }
    }

    fn terminate(&mut self) {
        self.shared.terminated.store(true, Ordering::SeqCst);
        self.shared.open.store(false, Ordering::SeqCst);
    }
}

/// Records every connection attempt; nothing happens until the test drives
/// the returned [`MockConnection`].
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    connections: Arc<Mutex<Vec<MockConnection>>>,
    hang_on_close: Arc<AtomicBool>,
}

impl MockConnector {
    /// Connections opened from now on never finish their close handshake.
    pub(crate) fn hang_on_close(&self) {
        self.hang_on_close.store(true, Ordering::SeqCst);
    }

    pub(crate) fn count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub(crate) fn nth(&self, index: usize) -> MockConnection {
        self.connections.lock().unwrap()[index].clone()
    }

    pub(crate) fn last(&self) -> MockConnection {
        self.connections
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no connection attempted")
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: &str, events: TransportEvents) -> Box<dyn Transport> {
        let shared = Arc::new(Shared::default());
        shared
            .hang_on_close
            .store(self.hang_on_close.load(Ordering::SeqCst), Ordering::SeqCst);
        self.connections.lock().unwrap().push(MockConnection {
            url: url.to_string(),
            events,
            shared: shared.clone(),
        });
        Box::new(MockTransport { shared })
    }
}

/// Forwarder returning a canned response
pub(crate) struct StubForwarder {
    pub(crate) seen: Mutex<Vec<(u16, ForwardRequest)>>,
    fail: AtomicBool,
}

impl StubForwarder {
    pub(crate) fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

impl Forward for StubForwarder {
    fn forward(
        &self,
        local_port: u16,
        request: ForwardRequest,
    ) -> BoxFuture<'static, Result<ForwardedResponse>> {
        self.seen.lock().unwrap().push((local_port, request));
        let result = if self.fail.load(Ordering::SeqCst) {
            Err(TunnelError::Forward("connection refused".into()))
        } else {
            Ok(ForwardedResponse {
                status: 200,
                headers: [
                    ("content-type".to_string(), "application/json".to_string()),
                    ("content-length".to_string(), "11".to_string()),
                ]
                .into(),
                body: r#"{"ok":true}"#.to_string(),
            })
        };
        Box::pin(future::ready(result))
    }
}

/// A machine plus the loop that would normally own it, driven by hand.
pub(crate) struct Harness {
    pub(crate) machine: TunnelMachine,
    pub(crate) inputs: mpsc::UnboundedReceiver<Input>,
    pub(crate) connector: MockConnector,
    pub(crate) forwarder: Arc<StubForwarder>,
    pub(crate) connected_calls: Arc<Mutex<Vec<bool>>>,
    pub(crate) errors: Arc<Mutex<Vec<String>>>,
    pub(crate) requests: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_key(Some(TEST_KEY))
    }

    pub(crate) fn with_key(api_key: Option<&str>) -> Self {
        let config = TunnelConfig {
            api_key: api_key.map(str::to_string),
            ..TunnelConfig::default()
        };
        Self::with_config(config)
    }

    pub(crate) fn with_config(config: TunnelConfig) -> Self {
        let connector = MockConnector::default();
        let forwarder = Arc::new(StubForwarder::new());
        let connected_calls = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let callbacks = Callbacks {
            on_connected: Some({
                let calls = connected_calls.clone();
                Arc::new(move |is_reconnect| calls.lock().unwrap().push(is_reconnect))
            }),
            on_request: Some({
                let requests = requests.clone();
                Arc::new(move |request| requests.lock().unwrap().push(request.id.clone()))
            }),
            on_error: Some({
                let errors = errors.clone();
                Arc::new(move |err| errors.lock().unwrap().push(err.to_string()))
            }),
        };

        let (tx, inputs) = mpsc::unbounded_channel();
        let machine = TunnelMachine::new(
            config,
            TEST_URL.to_string(),
            Arc::new(connector.clone()),
            forwarder.clone(),
            callbacks,
            tx,
        );

        Self {
            machine,
            inputs,
            connector,
            forwarder,
            connected_calls,
            errors,
            requests,
        }
    }

    /// Feed every input that is already queued.
    pub(crate) fn pump(&mut self) {
        while let Ok(input) = self.inputs.try_recv() {
            self.machine.handle(input);
        }
    }

    /// Wait for the next input (letting paused time advance), then pump.
    pub(crate) async fn step(&mut self) {
        let input = self.inputs.recv().await.expect("input channel closed");
        self.machine.handle(input);
        self.pump();
    }

    pub(crate) fn conn(&self) -> MockConnection {
        self.connector.last()
    }

    pub(crate) fn start(&mut self) -> oneshot::Receiver<Result<Registration>> {
        let (tx, rx) = oneshot::channel();
        self.machine.start(TEST_PORT, tx);
        self.pump();
        rx
    }

    pub(crate) fn stop(&mut self) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        self.machine.stop(Some(tx));
        self.pump();
        rx
    }

    pub(crate) fn graceful(&mut self) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        self.machine.graceful_reconnect(tx);
        self.pump();
        rx
    }

    /// Open and register the latest connection.
    pub(crate) fn establish(&mut self) {
        let conn = self.conn();
        conn.accept();
        self.pump();
        conn.receive(registered());
        self.pump();
    }

    /// `start` followed by a successful handshake.
    pub(crate) fn connect(&mut self) -> Registration {
        let mut rx = self.start();
        self.establish();
        rx.try_recv()
            .expect("start not settled")
            .expect("start failed")
    }
}

pub(crate) fn registered() -> serde_json::Value {
    serde_json::json!({
        "type": "registered",
        "data": { "tunnelId": "tun-1", "publicUrl": "https://tun-1.agents.test" }
    })
}
