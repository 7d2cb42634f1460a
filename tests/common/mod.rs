//! Shared test fixtures: a scriptable mock transport, a factory that
//! hands them out, and a recorder for bridge callbacks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mcp_bridge::config::TransportKind;
use mcp_bridge::core::events::InboundEvent;
use mcp_bridge::transport::factory::TransportFactory;
use mcp_bridge::transport::Transport;
use mcp_bridge::BridgeError;

/// Test transport: inbound frames are injected by hand through a
/// [`MockHandle`] and sends are recorded.
pub struct MockTransport {
    sent: Arc<Mutex<Vec<String>>>,
    fail_sends: Arc<AtomicBool>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundEvent>>,
    closed: CancellationToken,
}

/// Control handle for one [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    fail_sends: Arc<AtomicBool>,
    closed: CancellationToken,
}

impl MockHandle {
    pub fn inject(&self, message: &str) {
        let _ = self
            .inbound_tx
            .send(InboundEvent::Message(message.to_string()));
    }

    pub fn inject_error(&self, message: &str) {
        let _ = self
            .inbound_tx
            .send(InboundEvent::Error(BridgeError::TransportIo(
                message.to_string(),
            )));
    }

    /// Simulates a remote disconnect.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, MockHandle) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let fail_sends = Arc::new(AtomicBool::new(false));
        let closed = CancellationToken::new();

        let transport = Arc::new(Self {
            sent: sent.clone(),
            fail_sends: fail_sends.clone(),
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            closed: closed.clone(),
        });
        let handle = MockHandle {
            inbound_tx,
            sent,
            fail_sends,
            closed,
        };
        (transport, handle)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn recv(&self) -> Option<InboundEvent> {
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => None,
            event = rx.recv() => event,
        }
    }

    async fn send(&self, message: &str) -> Result<(), BridgeError> {
        if self.closed.is_cancelled() {
            return Err(BridgeError::TransportClosed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(BridgeError::TransportIo("mock send failure".to_string()));
        }
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }

    async fn close(&self) {
        self.closed.cancel();
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Factory creating a fresh [`MockTransport`] per call, recording every
/// handle so tests can reach transports created during reconnection.
#[derive(Default)]
pub struct MockFactory {
    pub server_handles: Mutex<Vec<MockHandle>>,
    pub client_handles: Mutex<Vec<MockHandle>>,
    pub fail_server_creates: AtomicBool,
    pub fail_client_creates: AtomicBool,
    /// When non-empty, the next client create pops a result override.
    pub client_create_script: Mutex<VecDeque<bool>>,
    pub server_creates: AtomicUsize,
    pub client_creates: AtomicUsize,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn latest_server(&self) -> MockHandle {
        self.server_handles
            .lock()
            .unwrap()
            .last()
            .expect("no server transport created yet")
            .clone()
    }

    pub fn latest_client(&self) -> MockHandle {
        self.client_handles
            .lock()
            .unwrap()
            .last()
            .expect("no client transport created yet")
            .clone()
    }

    pub fn server_creates(&self) -> usize {
        self.server_creates.load(Ordering::SeqCst)
    }

    pub fn client_creates(&self) -> usize {
        self.client_creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn create_server(
        &self,
        _kind: TransportKind,
        _config: &Map<String, Value>,
    ) -> Result<Arc<dyn Transport>, BridgeError> {
        self.server_creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_server_creates.load(Ordering::SeqCst) {
            return Err(BridgeError::TransportCreateFailed(
                "mock server create failure".to_string(),
            ));
        }
        let (transport, handle) = MockTransport::new();
        self.server_handles.lock().unwrap().push(handle);
        Ok(transport)
    }

    async fn create_client(
        &self,
        _kind: TransportKind,
        _config: &Map<String, Value>,
    ) -> Result<Arc<dyn Transport>, BridgeError> {
        self.client_creates.fetch_add(1, Ordering::SeqCst);
        let scripted = self.client_create_script.lock().unwrap().pop_front();
        let ok = scripted.unwrap_or(!self.fail_client_creates.load(Ordering::SeqCst));
        if !ok {
            return Err(BridgeError::TransportCreateFailed(
                "mock client create failure".to_string(),
            ));
        }
        let (transport, handle) = MockTransport::new();
        self.client_handles.lock().unwrap().push(handle);
        Ok(transport)
    }
}

/// Records callback invocations as flat strings for ordering assertions.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count_of(&self, event: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == event)
            .count()
    }
}

/// Polls `cond` until it holds or the deadline passes.
pub async fn wait_for(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
