use std::net::SocketAddr;

use devgate_core::DeviceId;
use thiserror::Error;

/// Errors surfaced by listeners, the registry and the outbound send path.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Failed to bind the listening socket
    #[error("Failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Device has no registered, open connection
    #[error("Device {0} not connected")]
    DeviceNotConnected(DeviceId),

    /// Connection was closed before it could be registered
    #[error("Connection for device {0} is already closed")]
    ConnectionClosed(DeviceId),

    /// Connection exists but the message could not be queued
    #[error("Failed to send to device {device_id}: {reason}")]
    SendFailed { device_id: DeviceId, reason: String },

    /// Listener built without a codec
    #[error("Listener '{0}' has no codec registered")]
    MissingCodec(String),

    /// Listener built without a processor
    #[error("Listener '{0}' has no processor registered")]
    MissingProcessor(String),

    /// Listener configuration rejected, or another core error
    #[error(transparent)]
    Core(#[from] devgate_core::Error),

    /// Dedicated runtime could not be created
    #[error("Failed to start listener runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why the pipeline gave up on a connection.
///
/// Every variant means the connection has already been closed.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// First message carried no device identity
    #[error("First message carries an empty device ID")]
    EmptyDeviceId,

    /// Processor refused the first message
    #[error("Authentication rejected for device {0}")]
    AuthRejected(DeviceId),

    /// Connection was closed (superseded, expired or disconnected) before
    /// its claim could be registered
    #[error("Connection closed before device {0} could register")]
    ConnectionClosed(DeviceId),

    /// Processor failed while handling a message
    #[error("Processing failed for device {device_id} (message type {message_type}): {source}")]
    Processor {
        device_id: DeviceId,
        message_type: i32,
        #[source]
        source: anyhow::Error,
    },
}
