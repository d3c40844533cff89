//! In-process transport backed by Tokio channels.
//!
//! [`MemoryConnector`] hands the remote end of every connection it opens
//! to the test as a [`MemoryPeer`], which plays the server: it reads what
//! the client sent and pushes frames back. Nothing touches the network, so
//! tests can run under a paused Tokio clock.

use std::collections::HashSet;
use std::sync::{Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, mpsc, watch};

use crate::{Connection, ConnectionId, Connector, TransportError};

/// A [`Connector`] whose connections terminate in [`MemoryPeer`]s.
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refused: StdMutex<HashSet<u64>>,
}

impl MemoryConnector {
    /// Creates a connector and the receiver on which every new peer
    /// arrives, in connect order.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers: tx,
            refused: StdMutex::new(HashSet::new()),
        };
        (connector, rx)
    }

    /// Makes every later `connect` for `room_id` fail.
    pub fn refuse(&self, room_id: u64) {
        self.refused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(room_id);
    }

    fn is_refused(&self, room_id: u64) -> bool {
        self.refused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&room_id)
    }
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(
        &self,
        room_id: u64,
    ) -> Result<Self::Connection, TransportError> {
        if self.is_refused(room_id) {
            return Err(TransportError::ConnectFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("room {room_id} refused"),
            )));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let (closed, closed_rx) = watch::channel(false);
        let id = ConnectionId::next();

        let peer = MemoryPeer {
            room_id,
            id,
            to_client: Some(to_client),
            from_client,
            closed: closed_rx,
        };
        self.peers.send(peer).map_err(|_| {
            TransportError::ConnectionClosed("memory listener dropped".into())
        })?;

        Ok(MemoryConnection {
            id,
            inbound: Mutex::new(inbound),
            outbound,
            closed,
        })
    }
}

/// The client half of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    closed: watch::Sender<bool>,
}

impl Connection for MemoryConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::ConnectionClosed(
                "send on closed connection".into(),
            ));
        }
        self.outbound.send(data.to_vec()).map_err(|_| {
            TransportError::ConnectionClosed("peer dropped".into())
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut closed = self.closed.subscribe();
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => Ok(None),
            msg = inbound.recv() => Ok(msg),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.send_replace(true);
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// The server half of an in-memory connection, owned by the test.
pub struct MemoryPeer {
    room_id: u64,
    id: ConnectionId,
    to_client: Option<mpsc::UnboundedSender<Vec<u8>>>,
    from_client: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: watch::Receiver<bool>,
}

impl MemoryPeer {
    /// The room the client asked for.
    pub fn room_id(&self) -> u64 {
        self.room_id
    }

    /// Id of the matching client connection.
    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    /// Delivers one message to the client's `recv`.
    pub fn send(&self, data: impl Into<Vec<u8>>) -> Result<(), TransportError> {
        let tx = self.to_client.as_ref().ok_or_else(|| {
            TransportError::ConnectionClosed("peer disconnected".into())
        })?;
        tx.send(data.into()).map_err(|_| {
            TransportError::ConnectionClosed("client dropped".into())
        })
    }

    /// Waits for the next message the client sent.
    ///
    /// Messages already queued are returned before a close is reported.
    /// Returns `None` once the client has closed or dropped the connection.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        tokio::select! {
            biased;
            Some(msg) = self.from_client.recv() => Some(msg),
            _ = self.closed.wait_for(|c| *c) => None,
        }
    }

    /// Returns a queued client message without waiting.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.from_client.try_recv().ok()
    }

    /// Simulates the server hanging up: the client's `recv` sees a clean
    /// close once queued messages are drained.
    pub fn disconnect(&mut self) {
        self.to_client = None;
    }

    /// Whether the client has called `close`.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}
