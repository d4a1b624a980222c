//! In-process transport
//!
//! [`pair`] returns the client end as a [`Connection`] and the relay end as a
//! [`MemoryPeer`], which scripts server events and observes what the client
//! emitted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{Connection, Connector, Transport, TransportError, TransportEvent};

pub type Emitted = (String, Vec<Value>);

struct MemoryTransport {
    emitted: mpsc::UnboundedSender<Emitted>,
    closes: Arc<AtomicUsize>,
}

impl Transport for MemoryTransport {
    fn emit(&self, name: &str, args: Vec<Value>) -> Result<(), TransportError> {
        self.emitted
            .send((name.to_string(), args))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MemoryPeer {
    emitted: mpsc::UnboundedReceiver<Emitted>,
    events: mpsc::UnboundedSender<TransportEvent>,
    closes: Arc<AtomicUsize>,
}

impl MemoryPeer {
    /// Queue a transport event for the client. Returns false once the
    /// client has stopped listening.
    pub fn deliver(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn deliver_event(&self, name: &str, args: Vec<Value>) -> bool {
        self.deliver(TransportEvent::Message {
            name: name.to_string(),
            args,
        })
    }

    pub async fn next_emitted(&mut self) -> Option<Emitted> {
        self.emitted.recv().await
    }

    pub fn try_next_emitted(&mut self) -> Option<Emitted> {
        self.emitted.try_recv().ok()
    }

    /// Number of times the client called `close` on its transport.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub fn pair() -> (Connection, MemoryPeer) {
    let (emitted_tx, emitted_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let closes = Arc::new(AtomicUsize::new(0));

    let connection = Connection {
        transport: Box::new(MemoryTransport {
            emitted: emitted_tx,
            closes: Arc::clone(&closes),
        }),
        events: events_rx,
    };
    let peer = MemoryPeer {
        emitted: emitted_rx,
        events: events_tx,
        closes,
    };
    (connection, peer)
}

/// Hands out one prepared connection, whatever address is asked for.
pub struct MemoryConnector {
    connection: Mutex<Option<Connection>>,
}

impl MemoryConnector {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection: Mutex::new(Some(connection)),
        }
    }

    pub fn pair() -> (Self, MemoryPeer) {
        let (connection, peer) = pair();
        (Self::new(connection), peer)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, server_addr: &str) -> Result<Connection, TransportError> {
        log::debug!("Opening in-memory connection for {}", server_addr);
        self.connection
            .lock()
            .take()
            .ok_or_else(|| TransportError::ConnectionError("memory connection already used".into()))
    }
}
