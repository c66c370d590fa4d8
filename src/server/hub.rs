//! Push hub: the set of connected clients and the broadcast actor.
//!
//! # Architecture
//!
//! ```text
//! Coordinator --[Outcome]--> HubActor --[broadcast]--> clients
//! listener ----[AddClient]-->    |                        |
//!                                |   reader thread <------+ (events, output)
//!                                v
//!                        ClientMessage receiver (dev log / browser runner)
//! ```
//!
//! The client set is the only structure shared between threads; insert,
//! remove and broadcast all go through one mutex.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::message::{ClientEvent, OutputChunk, PushMessage};
use crate::coordinator::BuildOutcome;
use crate::diagnostics::TraceFormat;
use crate::session::Shutdown;

const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What a non-blocking read from one client produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    Binary(Vec<u8>),
    /// Nothing to read right now
    Idle,
    /// Client went away
    Closed,
}

/// One client connection, as seen by the hub.
pub trait PushSink: Send {
    /// Queue a text frame. An error means the client is gone.
    fn send_text(&mut self, text: &str) -> Result<(), String>;

    /// Non-blocking read of the next frame.
    fn poll(&mut self) -> Incoming;

    fn close(&mut self);
}

struct Client {
    id: u64,
    sink: Box<dyn PushSink>,
    format: Option<TraceFormat>,
}

/// Message received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    pub client: u64,
    /// Stack-trace format of the client's engine, when known
    pub format: Option<TraceFormat>,
    pub payload: ClientPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPayload {
    Event(ClientEvent),
    Output(OutputChunk),
}

/// Shared set of connected clients.
#[derive(Clone, Default)]
pub struct PushHub {
    clients: Arc<Mutex<Vec<Client>>>,
    next_id: Arc<AtomicU64>,
}

impl PushHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client. It only sees messages broadcast after this call.
    pub fn add(&self, sink: Box<dyn PushSink>, format: Option<TraceFormat>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut clients = self.clients.lock();
        clients.push(Client { id, sink, format });
        crate::debug!("ws"; "client {} connected (total: {})", id, clients.len());
        id
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send `message` to every client; clients whose send fails are removed.
    ///
    /// Returns the number of clients that received it.
    pub fn broadcast(&self, message: &PushMessage) -> usize {
        let text = message.to_json();
        let mut clients = self.clients.lock();

        if clients.is_empty() {
            crate::debug!("ws"; "no clients connected");
            return 0;
        }

        clients.retain_mut(|client| match client.sink.send_text(&text) {
            Ok(()) => true,
            Err(e) => {
                crate::debug!("ws"; "client {} disconnected: {}", client.id, e);
                false
            }
        });
        crate::debug!("ws"; "broadcast to {} clients", clients.len());
        clients.len()
    }

    /// One non-blocking read pass over all clients.
    ///
    /// Closed clients are removed; unparseable frames are dropped.
    pub fn poll_clients(&self) -> Vec<ClientMessage> {
        let mut received = Vec::new();
        let mut clients = self.clients.lock();

        clients.retain_mut(|client| {
            loop {
                let payload = match client.sink.poll() {
                    Incoming::Idle => return true,
                    Incoming::Closed => {
                        crate::debug!("ws"; "client {} closed", client.id);
                        return false;
                    }
                    Incoming::Text(text) => ClientEvent::parse(&text).map(ClientPayload::Event),
                    Incoming::Binary(frame) => {
                        OutputChunk::decode(&frame).map(ClientPayload::Output)
                    }
                };
                if let Some(payload) = payload {
                    received.push(ClientMessage {
                        client: client.id,
                        format: client.format,
                        payload,
                    });
                }
            }
        });

        received
    }

    pub fn close_all(&self) {
        let mut clients = self.clients.lock();
        for mut client in clients.drain(..) {
            client.sink.close();
        }
    }

    /// Poll clients until `shutdown`, forwarding messages to `events`.
    pub fn spawn_reader(&self, events: Sender<ClientMessage>, shutdown: Shutdown) {
        let hub = self.clone();
        std::thread::spawn(move || {
            while !shutdown.is_cancelled() {
                for message in hub.poll_clients() {
                    // Nobody listening is fine; keep draining clients
                    let _ = events.send(message);
                }
                std::thread::sleep(READ_POLL_INTERVAL);
            }
        });
    }
}

// ============================================================================
// Actor
// ============================================================================

/// Messages to the hub actor.
pub enum HubMsg {
    /// Build finished: push reload or diagnostics
    Outcome(BuildOutcome),
    /// New connection after handshake
    AddClient(Box<dyn PushSink>, Option<TraceFormat>),
    Shutdown,
}

/// Serializes broadcasts so outcomes reach clients in completion order.
pub struct HubActor {
    rx: mpsc::Receiver<HubMsg>,
    hub: PushHub,
}

impl HubActor {
    pub fn new(rx: mpsc::Receiver<HubMsg>, hub: PushHub) -> Self {
        Self { rx, hub }
    }

    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                HubMsg::Outcome(outcome) => {
                    let message = PushMessage::from_outcome(&outcome);
                    self.hub.broadcast(&message);
                }
                HubMsg::AddClient(sink, format) => {
                    self.hub.add(sink, format);
                }
                HubMsg::Shutdown => {
                    crate::debug!("ws"; "shutting down");
                    break;
                }
            }
        }
        self.hub.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory client recording what it was sent.
    #[derive(Clone, Default)]
    struct MockSink {
        sent: Arc<Mutex<Vec<String>>>,
        inbox: Arc<Mutex<VecDeque<Incoming>>>,
        broken: Arc<Mutex<bool>>,
    }

    impl MockSink {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().clone()
        }

        fn push(&self, incoming: Incoming) {
            self.inbox.lock().push_back(incoming);
        }

        fn disconnect(&self) {
            *self.broken.lock() = true;
        }
    }

    impl PushSink for MockSink {
        fn send_text(&mut self, text: &str) -> Result<(), String> {
            if *self.broken.lock() {
                return Err("broken pipe".into());
            }
            self.sent.lock().push(text.to_string());
            Ok(())
        }

        fn poll(&mut self) -> Incoming {
            if *self.broken.lock() {
                return Incoming::Closed;
            }
            self.inbox.lock().pop_front().unwrap_or(Incoming::Idle)
        }

        fn close(&mut self) {}
    }

    fn connect(hub: &PushHub) -> MockSink {
        let sink = MockSink::default();
        hub.add(Box::new(sink.clone()), Some(TraceFormat::V8));
        sink
    }

    #[test]
    fn test_broadcast_reaches_every_client() {
        let hub = PushHub::new();
        let clients: Vec<_> = (0..3).map(|_| connect(&hub)).collect();

        assert_eq!(hub.broadcast(&PushMessage::Reload), 3);
        for client in &clients {
            assert_eq!(client.sent(), vec![r#"{"kind":"reload"}"#]);
        }
    }

    #[test]
    fn test_disconnected_client_is_skipped_and_removed() {
        let hub = PushHub::new();
        let a = connect(&hub);
        let b = connect(&hub);
        let c = connect(&hub);

        b.disconnect();
        assert_eq!(hub.broadcast(&PushMessage::Reload), 2);
        assert_eq!(hub.len(), 2);
        assert_eq!(a.sent().len(), 1);
        assert!(b.sent().is_empty());
        assert_eq!(c.sent().len(), 1);
    }

    #[test]
    fn test_failure_outcome_sends_no_reload() {
        let hub = PushHub::new();
        let client = connect(&hub);

        hub.broadcast(&PushMessage::from_outcome(&BuildOutcome::failed("boom")));
        let sent = client.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains(r#""kind":"stackTrace""#));
        assert!(!sent.iter().any(|m| m.contains("reload")));
    }

    #[test]
    fn test_broadcast_with_no_clients() {
        let hub = PushHub::new();
        assert!(hub.is_empty());
        assert_eq!(hub.broadcast(&PushMessage::Reload), 0);
    }

    #[test]
    fn test_late_client_sees_no_replay() {
        let hub = PushHub::new();
        let early = connect(&hub);
        hub.broadcast(&PushMessage::Reload);
        let late = connect(&hub);

        assert_eq!(early.sent().len(), 1);
        assert!(late.sent().is_empty());
    }

    #[test]
    fn test_poll_clients_parses_and_removes_closed() {
        let hub = PushHub::new();
        let a = connect(&hub);
        let b = connect(&hub);

        a.push(Incoming::Text(r#"{"kind":"testPassed"}"#.into()));
        a.push(Incoming::Text("garbage".into()));
        let mut frame = 1001u16.to_le_bytes().to_vec();
        frame.extend_from_slice(b"line");
        a.push(Incoming::Binary(frame));
        b.disconnect();

        let received = hub.poll_clients();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].payload, ClientPayload::Event(ClientEvent::TestPassed));
        assert!(matches!(received[1].payload, ClientPayload::Output(_)));
        assert_eq!(hub.len(), 1);
    }

    #[tokio::test]
    async fn test_actor_broadcasts_outcomes_in_order() {
        let hub = PushHub::new();
        let client = connect(&hub);
        let (tx, rx) = mpsc::channel(8);
        let actor = tokio::spawn(HubActor::new(rx, hub.clone()).run());

        tx.send(HubMsg::Outcome(BuildOutcome::failed("first"))).await.unwrap();
        tx.send(HubMsg::Outcome(BuildOutcome {
            succeeded: true,
            log_text: String::new(),
            artifact_path: None,
        }))
        .await
        .unwrap();
        tx.send(HubMsg::Shutdown).await.unwrap();
        actor.await.unwrap();

        let sent = client.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("first"));
        assert_eq!(sent[1], r#"{"kind":"reload"}"#);
        assert!(hub.is_empty());
    }
}
