//! TCP listener for device connections.
//!
//! A [`Listener`] binds one port, accepts device connections and drives
//! each through the [`Pipeline`]. Every listener has its own codec,
//! processor and idle policy; several listeners may share one
//! [`ConnectionRegistry`].
//!
//! # Architecture
//!
//! ```text
//! Device A ┐                 ┌─ accept task(s) ── spawn per connection
//!          │                 │
//! Device B ├──> TcpListener ─┤     connection task: Framed<TcpStream, C>
//!          │                 │       inbound  -> Pipeline -> MessageProcessor
//! Device C ┘                 │       outbound <- ConnectionHandle::send
//!                            │
//!                            └─ IdleMonitor (periodic sweep)
//! ```
//!
//! # Example Usage
//!
//! ```no_run
//! use devgate_network::{ConnectionHandle, ListenerBuilder, ListenerConfig, MessageProcessor};
//! use devgate_protocol::{LengthPrefixedCodec, Message};
//!
//! struct Echo;
//!
//! impl MessageProcessor for Echo {
//!     fn process(&self, message: Message, connection: &ConnectionHandle) -> anyhow::Result<()> {
//!         connection.send(message);
//!         Ok(())
//!     }
//! }
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let listener = ListenerBuilder::new(ListenerConfig::default())
//!     .codec(LengthPrefixedCodec::new())
//!     .processor(Echo)
//!     .build()?;
//!
//! // Runs on its own runtime until shut down
//! let handle = listener.start()?;
//! println!("Listening on {}", handle.local_addr());
//! handle.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. Accept, set `TCP_NODELAY`, create a [`ConnectionHandle`]
//! 2. Decode frames; the first one authenticates and registers the device
//! 3. Write anything queued on the handle back to the socket; a close or
//!    shutdown interrupts a write stuck on a peer that stopped reading
//! 4. Stop on peer close, I/O error, malformed frame, pipeline error,
//!    handle close (supersession, idle timeout, `disconnect`) or shutdown
//! 5. Remove the connection from the registry and notify the processor

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use devgate_core::Error;
use devgate_protocol::MessageCodec;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::config::ListenerConfig;
use crate::error::GatewayError;
use crate::handle::ConnectionHandle;
use crate::lifecycle::IdleMonitor;
use crate::pipeline::Pipeline;
use crate::processor::MessageProcessor;
use crate::registry::ConnectionRegistry;

/// Delay before accepting again after `accept(2)` fails, so a full file
/// descriptor table does not turn into a busy loop.
const ACCEPT_ERROR_BACKOFF: std::time::Duration = std::time::Duration::from_millis(100);

/// Collects what a listener needs before it can start.
///
/// Both a codec and a processor are required; [`build`](Self::build)
/// fails fast if either is missing or the configuration is invalid.
pub struct ListenerBuilder<C, P> {
    config: ListenerConfig,
    codec: Option<C>,
    processor: Option<Arc<P>>,
    registry: Option<Arc<ConnectionRegistry>>,
}

impl<C: MessageCodec, P: MessageProcessor> ListenerBuilder<C, P> {
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            config,
            codec: None,
            processor: None,
            registry: None,
        }
    }

    pub fn codec(mut self, codec: C) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn processor(self, processor: P) -> Self {
        self.shared_processor(Arc::new(processor))
    }

    /// Use a processor the caller keeps a reference to.
    pub fn shared_processor(mut self, processor: Arc<P>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Share a registry with other listeners. Defaults to a fresh one.
    pub fn registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Validate and assemble the listener. Nothing is bound yet.
    ///
    /// # Errors
    ///
    /// - `GatewayError::Core` if the configuration is invalid
    /// - `GatewayError::MissingCodec` / `MissingProcessor`
    pub fn build(self) -> Result<Listener<C, P>, GatewayError> {
        self.config.validate()?;

        let codec = self
            .codec
            .ok_or_else(|| GatewayError::MissingCodec(self.config.name.clone()))?;
        let processor = self
            .processor
            .ok_or_else(|| GatewayError::MissingProcessor(self.config.name.clone()))?;

        Ok(Listener {
            config: self.config,
            codec,
            processor,
            registry: self.registry.unwrap_or_default(),
        })
    }
}

/// A configured, not yet bound listener.
pub struct Listener<C, P> {
    config: ListenerConfig,
    codec: C,
    processor: Arc<P>,
    registry: Arc<ConnectionRegistry>,
}

impl<C: MessageCodec, P: MessageProcessor> Listener<C, P> {
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Bind the listening socket on the current runtime.
    ///
    /// Sets `SO_REUSEADDR` and `SO_KEEPALIVE` and listens with the
    /// configured backlog.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::BindFailed` if the address cannot be bound.
    pub async fn bind(self) -> Result<BoundListener<C, P>, GatewayError> {
        let addr = self.config.bind_addr();
        let listener = listen(addr, self.config.accept_backlog)
            .map_err(|source| GatewayError::BindFailed { addr, source })?;
        let local_addr = listener.local_addr()?;

        info!(
            listener = %self.config.name,
            addr = %local_addr,
            backlog = self.config.accept_backlog,
            accept_workers = self.config.boss_worker_count,
            "Listener bound"
        );

        Ok(BoundListener {
            name: Arc::from(self.config.name.as_str()),
            listener: Arc::new(listener),
            local_addr,
            config: self.config,
            codec: self.codec,
            processor: self.processor,
            registry: self.registry,
        })
    }

    /// Bind and serve on a dedicated multi-threaded runtime with
    /// `io_worker_count` worker threads.
    ///
    /// Must be called outside of any tokio runtime. Use
    /// [`bind`](Self::bind) and [`BoundListener::run`] to serve on an
    /// existing one.
    pub fn start(self) -> Result<ListenerHandle, GatewayError> {
        let name = self.config.name.clone();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.io_worker_count)
            .thread_name(format!("devgate-{name}-io"))
            .enable_all()
            .build()
            .map_err(GatewayError::Runtime)?;

        let bound = runtime.block_on(self.bind())?;
        let local_addr = bound.local_addr();
        let registry = Arc::clone(&bound.registry);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let thread = std::thread::Builder::new()
            .name(format!("devgate-{name}"))
            .spawn(move || {
                if let Err(e) = runtime.block_on(bound.run(token)) {
                    error!(listener = %name, error = %e, "Listener stopped with error");
                }
            })
            .map_err(GatewayError::Runtime)?;

        Ok(ListenerHandle {
            local_addr,
            registry,
            shutdown,
            thread: Some(thread),
        })
    }
}

fn listen(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.set_keepalive(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// A listener whose socket is bound and ready to accept.
pub struct BoundListener<C, P> {
    name: Arc<str>,
    listener: Arc<TcpListener>,
    local_addr: SocketAddr,
    config: ListenerConfig,
    codec: C,
    processor: Arc<P>,
    registry: Arc<ConnectionRegistry>,
}

impl<C: MessageCodec, P: MessageProcessor> BoundListener<C, P> {
    /// Get the local address the listener is bound to
    ///
    /// This is useful for tests that bind to port 0 (OS-assigned random port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Accept and serve connections until `shutdown` is cancelled.
    ///
    /// On shutdown every open connection of this listener is closed, and
    /// the call returns once all of them have been cleaned up.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), GatewayError> {
        let tracker = TaskTracker::new();
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.processor),
        ));

        let monitor = IdleMonitor::new(
            Arc::clone(&self.name),
            self.config.idle_policy(),
            Arc::clone(&self.registry),
            Arc::clone(&self.processor),
        );
        tracker.spawn(monitor.run(shutdown.clone()));

        let mut acceptors = JoinSet::new();
        for worker in 0..self.config.boss_worker_count {
            acceptors.spawn(accept_loop(
                worker,
                Arc::clone(&self.listener),
                self.codec.clone(),
                Arc::clone(&pipeline),
                tracker.clone(),
                shutdown.clone(),
                Arc::clone(&self.name),
            ));
        }

        while let Some(result) = acceptors.join_next().await {
            if let Err(e) = result {
                error!(listener = %self.name, error = %e, "Accept task failed");
                shutdown.cancel();
            }
        }

        tracker.close();
        tracker.wait().await;

        info!(listener = %self.name, addr = %self.local_addr, "Listener stopped");
        Ok(())
    }
}

async fn accept_loop<C: MessageCodec, P: MessageProcessor>(
    worker: usize,
    listener: Arc<TcpListener>,
    codec: C,
    pipeline: Arc<Pipeline<P>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    name: Arc<str>,
) {
    trace!(listener = %name, worker, "Accept task started");

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(listener = %name, worker, error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                continue;
            }
        };

        info!(listener = %name, peer = %peer, "Accepted connection");
        tracker.spawn(serve_connection(
            stream,
            peer,
            codec.clone(),
            Arc::clone(&pipeline),
            shutdown.clone(),
            Arc::clone(&name),
        ));
    }

    trace!(listener = %name, worker, "Accept task stopped");
}

async fn serve_connection<C: MessageCodec, P: MessageProcessor>(
    stream: TcpStream,
    peer: SocketAddr,
    codec: C,
    pipeline: Arc<Pipeline<P>>,
    shutdown: CancellationToken,
    name: Arc<str>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    let (handle, mut outbound) = ConnectionHandle::channel(name, peer);
    let (mut sink, mut frames) = Framed::new(stream, codec).split();

    loop {
        tokio::select! {
            biased;
            _ = handle.closed() => {
                debug!(peer = %peer, "Connection closed by gateway");
                break;
            }
            _ = shutdown.cancelled() => break,
            frame = frames.next() => match frame {
                Some(Ok(message)) => {
                    trace!(
                        peer = %peer,
                        device_id = message.device_id(),
                        message_type = message.message_type(),
                        payload_len = message.payload().len(),
                        "Received message"
                    );
                    if pipeline.handle_message(&handle, message).is_err() {
                        break;
                    }
                }
                Some(Err(e)) if e.is_frame_error() => {
                    warn!(peer = %peer, error = %e, "Malformed frame, closing connection");
                    break;
                }
                Some(Err(e)) => {
                    debug!(peer = %peer, error = %e, "Connection read failed");
                    break;
                }
                None => {
                    debug!(peer = %peer, "Connection closed by peer");
                    break;
                }
            },
            Some(message) = outbound.recv() => {
                // a peer that stops reading must not keep the close from landing
                let written = tokio::select! {
                    biased;
                    _ = handle.closed() => {
                        debug!(peer = %peer, "Connection closed by gateway during write");
                        break;
                    }
                    _ = shutdown.cancelled() => break,
                    written = sink.send(message) => written,
                };
                if let Err(e) = written {
                    if let Error::Io(_) = e {
                        debug!(peer = %peer, error = %e, "Connection write failed");
                        break;
                    }
                    warn!(peer = %peer, error = %e, "Dropping outbound message");
                }
            }
        }
    }

    handle.close();
    pipeline.on_closed(&handle);
}

/// Running listener started with [`Listener::start`].
///
/// Dropping the handle signals shutdown without waiting for it.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Stop accepting, close every connection and wait for the listener
    /// thread to finish.
    pub fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(addr = %self.local_addr, "Listener thread panicked");
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
