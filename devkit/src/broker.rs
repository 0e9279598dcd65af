/*!
In-process STOMP broker for tests without a backend.

`MockBroker` implements `PushConnector`: every `open` creates a link that
answers CONNECT by itself, records what the client sends and lets the test
push MESSAGE or ERROR frames, or drop the socket.
*/

use async_trait::async_trait;
use devsecwatch_live::stomp::{Command, Frame, Inbound};
use devsecwatch_live::transport::{FrameLink, PushConnector};
use devsecwatch_live::{LiveError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

#[derive(Debug)]
struct Connection {
    endpoint: Url,
    to_client: Option<mpsc::UnboundedSender<Inbound>>,
    received: Vec<Frame>,
    heartbeats: usize,
    subscriptions: Vec<(String, String)>,
}

impl Connection {
    fn hang_up(&mut self) {
        self.to_client = None;
        self.subscriptions.clear();
    }
}

#[derive(Debug)]
struct BrokerState {
    connections: Vec<Connection>,
    refuse: usize,
    answer_connect: bool,
    server_heartbeat: String,
}

/// Cheap to clone; clones share the same broker.
#[derive(Clone)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                connections: Vec::new(),
                refuse: 0,
                answer_connect: true,
                server_heartbeat: "0,0".into(),
            })),
        }
    }

    /// `heart-beat` header sent back in CONNECTED.
    pub fn with_heartbeat(self, header: &str) -> Self {
        self.state.lock().server_heartbeat = header.to_string();
        self
    }

    /// Leaves CONNECT unanswered, for connect timeout tests.
    pub fn silent(self) -> Self {
        self.state.lock().answer_connect = false;
        self
    }

    /// The next `n` opens fail at socket level.
    pub fn refuse_next(&self, n: usize) {
        self.state.lock().refuse = n;
    }

    pub fn opens(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn live_connections(&self) -> usize {
        self.state.lock().connections.iter().filter(|c| c.to_client.is_some()).count()
    }

    pub fn endpoints(&self) -> Vec<Url> {
        self.state.lock().connections.iter().map(|c| c.endpoint.clone()).collect()
    }

    /// Active SUBSCRIBE destinations on live connections, in order.
    /// A dropped or closed socket takes its subscriptions with it.
    pub fn subscriptions(&self) -> Vec<String> {
        self.state
            .lock()
            .connections
            .iter()
            .flat_map(|c| c.subscriptions.iter().map(|(_, dest)| dest.clone()))
            .collect()
    }

    /// Frames of one command received on any connection.
    pub fn received(&self, command: Command) -> Vec<Frame> {
        self.state
            .lock()
            .connections
            .iter()
            .flat_map(|c| c.received.iter().filter(|f| f.command == command).cloned())
            .collect()
    }

    pub fn heartbeats_received(&self) -> usize {
        self.state.lock().connections.iter().map(|c| c.heartbeats).sum()
    }

    /// Delivers a MESSAGE to every live connection subscribed to
    /// `destination`. Returns how many got it.
    pub fn publish(&self, destination: &str, body: impl Into<Vec<u8>>) -> usize {
        let body = body.into();
        let mut delivered = 0;
        let state = self.state.lock();
        for (n, conn) in state.connections.iter().enumerate() {
            let Some(tx) = conn.to_client.as_ref() else { continue };
            for (sub_id, dest) in &conn.subscriptions {
                if dest != destination {
                    continue;
                }
                let frame = Frame::new(Command::Message)
                    .header("destination", destination)
                    .header("subscription", sub_id.as_str())
                    .header("message-id", format!("{n}-{delivered}"))
                    .header("content-type", "application/json")
                    .body(body.clone());
                if tx.send(Inbound::Frame(frame)).is_ok() {
                    delivered += 1;
                }
            }
        }
        log::debug!("[broker] published to {destination}, {delivered} deliveries");
        delivered
    }

    /// Sends an ERROR frame on the newest live connection.
    pub fn send_error(&self, message: &str) {
        let state = self.state.lock();
        if let Some(tx) = state.connections.iter().rev().find_map(|c| c.to_client.as_ref()) {
            let _ = tx.send(Inbound::Frame(Frame::new(Command::Error).header("message", message)));
        }
    }

    pub fn send_heartbeat(&self) {
        let state = self.state.lock();
        for tx in state.connections.iter().filter_map(|c| c.to_client.as_ref()) {
            let _ = tx.send(Inbound::Heartbeat);
        }
    }

    /// Closes every socket from the server side.
    pub fn drop_connections(&self) {
        let mut state = self.state.lock();
        for conn in state.connections.iter_mut() {
            conn.hang_up();
        }
        log::debug!("[broker] dropped all connections");
    }
}

#[async_trait]
impl PushConnector for MockBroker {
    async fn open(&self, endpoint: &Url) -> Result<Box<dyn FrameLink>> {
        let mut state = self.state.lock();
        if state.refuse > 0 {
            state.refuse -= 1;
            return Err(LiveError::Transport("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.connections.push(Connection {
            endpoint: endpoint.clone(),
            to_client: Some(tx),
            received: Vec::new(),
            heartbeats: 0,
            subscriptions: Vec::new(),
        });
        let index = state.connections.len() - 1;
        log::debug!("[broker] connection {index} opened on {endpoint}");
        Ok(Box::new(MockLink { broker: self.clone(), index, rx, pending: VecDeque::new() }))
    }
}

struct MockLink {
    broker: MockBroker,
    index: usize,
    rx: mpsc::UnboundedReceiver<Inbound>,
    pending: VecDeque<Inbound>,
}

impl MockLink {
    fn with_conn<T>(&self, f: impl FnOnce(&mut BrokerState, usize) -> T) -> T {
        let mut state = self.broker.state.lock();
        f(&mut state, self.index)
    }
}

#[async_trait]
impl FrameLink for MockLink {
    async fn send(&mut self, frame: &Frame) -> Result<()> {
        let reply = self.with_conn(|state, index| {
            let answer = state.answer_connect;
            let heartbeat = state.server_heartbeat.clone();
            let conn = &mut state.connections[index];
            if conn.to_client.is_none() {
                return Err(LiveError::Closed);
            }
            conn.received.push(frame.clone());
            match frame.command {
                Command::Connect if answer => Ok(Some(
                    Frame::new(Command::Connected)
                        .header("version", "1.2")
                        .header("heart-beat", heartbeat),
                )),
                Command::Subscribe => {
                    if let (Some(id), Some(dest)) = (frame.get("id"), frame.get("destination")) {
                        conn.subscriptions.push((id.to_string(), dest.to_string()));
                    }
                    Ok(None)
                }
                Command::Unsubscribe => {
                    if let Some(id) = frame.get("id") {
                        conn.subscriptions.retain(|(sub, _)| sub != id);
                    }
                    Ok(None)
                }
                _ => Ok(None),
            }
        })?;
        if let Some(reply) = reply {
            self.pending.push_back(Inbound::Frame(reply));
        }
        Ok(())
    }

    async fn send_heartbeat(&mut self) -> Result<()> {
        self.with_conn(|state, index| {
            let conn = &mut state.connections[index];
            if conn.to_client.is_none() {
                return Err(LiveError::Closed);
            }
            conn.heartbeats += 1;
            Ok(())
        })
    }

    async fn recv(&mut self) -> Option<Result<Inbound>> {
        if let Some(item) = self.pending.pop_front() {
            return Some(Ok(item));
        }
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.with_conn(|state, index| state.connections[index].hang_up());
        self.rx.close();
    }
}
