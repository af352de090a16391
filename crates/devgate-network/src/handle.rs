//! Transport handles.
//!
//! A [`ConnectionHandle`] is the registry's reference to one accepted TCP
//! connection. It does not own the socket: the connection task does. The
//! handle carries an outbound queue into that task and a cancellation token
//! the task watches, so anyone holding a clone can write to or close the
//! connection without touching the stream.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use devgate_core::constants::OUTBOUND_BUFFER_CAPACITY;
use devgate_protocol::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique identity of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Inner {
    id: ConnectionId,
    listener: Arc<str>,
    peer: SocketAddr,
    outbound: mpsc::Sender<Message>,
    closed: CancellationToken,
}

/// Cheap, cloneable reference to a live connection.
///
/// Equality and hashing use the connection ID only.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its outbound queue.
    ///
    /// The connection task keeps the receiver and writes whatever arrives
    /// on it to the socket.
    pub fn channel(
        listener: impl Into<Arc<str>>,
        peer: SocketAddr,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_BUFFER_CAPACITY);
        let handle = Self {
            inner: Arc::new(Inner {
                id: ConnectionId::new(),
                listener: listener.into(),
                peer,
                outbound,
                closed: CancellationToken::new(),
            }),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Name of the listener that accepted this connection.
    pub fn listener(&self) -> &str {
        &self.inner.listener
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    /// Queue a message for the device without waiting.
    ///
    /// Returns `false` if the connection is closed or its outbound buffer
    /// is full. Nothing is retried.
    pub fn send(&self, message: Message) -> bool {
        if self.inner.closed.is_cancelled() {
            return false;
        }
        self.inner.outbound.try_send(message).is_ok()
    }

    /// Ask the connection task to shut the socket down. Idempotent.
    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    /// Whether the transport is still open.
    pub fn is_open(&self) -> bool {
        !self.inner.closed.is_cancelled() && !self.inner.outbound.is_closed()
    }

    /// Resolves once [`close`](Self::close) has been called on any clone.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        self.inner.closed.clone().cancelled_owned()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ConnectionHandle {}

impl std::hash::Hash for ConnectionHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("listener", &self.inner.listener)
            .field("peer", &self.inner.peer)
            .field("open", &self.is_open())
            .finish()
    }
}
